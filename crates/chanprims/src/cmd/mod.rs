use std::sync::Arc;

use chanprims_binding::LOOPBACK_SCHEME;
use chanprims_message::{
    BinaryEncoderSettings, BinaryMessageEncoderFactory, CompressionFormat, MessageEncoder,
    MessageEncoderFactory,
};
use clap::{Args, Subcommand};

use crate::exit::{message_error, CliResult};
use crate::output::OutputFormat;

pub mod content_type;
pub mod decode;
pub mod encode;
pub mod request;
pub mod varint;
pub mod version;

pub const DEFAULT_ACTION: &str = "urn:chanprims:echo";

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Encode or decode base-128 varints.
    Varint(VarintArgs),
    /// Encode a text message with the binary encoder.
    Encode(EncodeArgs),
    /// Decode a hex-encoded binary message.
    Decode(DecodeArgs),
    /// Show or check the binary encoder content type.
    ContentType(ContentTypeArgs),
    /// Send a request through a loopback binding and print the reply.
    Request(RequestArgs),
    /// Show version information.
    Version(VersionArgs),
}

pub fn run(command: Command, format: OutputFormat) -> CliResult<i32> {
    match command {
        Command::Varint(args) => varint::run(args, format),
        Command::Encode(args) => encode::run(args, format),
        Command::Decode(args) => decode::run(args, format),
        Command::ContentType(args) => content_type::run(args, format),
        Command::Request(args) => request::run(args, format),
        Command::Version(args) => version::run(args),
    }
}

/// Encoder selection shared by the encoding commands.
#[derive(Args, Debug, Clone)]
pub struct EncoderArgs {
    /// Payload compression: none, gzip or deflate.
    #[arg(long, default_value = "none")]
    pub compression: CompressionFormat,
    /// Use the session encoder with its per-session dictionary.
    #[arg(long)]
    pub session: bool,
}

impl EncoderArgs {
    pub fn settings(&self) -> BinaryEncoderSettings {
        BinaryEncoderSettings {
            compression: self.compression,
            ..BinaryEncoderSettings::default()
        }
    }

    pub fn encoder(&self) -> CliResult<Arc<dyn MessageEncoder>> {
        let factory = BinaryMessageEncoderFactory::new(self.settings())
            .map_err(|err| message_error("invalid encoder settings", err))?;
        Ok(if self.session {
            factory.create_session_encoder()
        } else {
            factory.encoder()
        })
    }
}

#[derive(Args, Debug)]
pub struct VarintArgs {
    #[command(subcommand)]
    pub action: VarintAction,
}

#[derive(Subcommand, Debug)]
pub enum VarintAction {
    /// Encode one or more values.
    Encode {
        #[arg(required = true)]
        values: Vec<u32>,
    },
    /// Decode the first varint in a hex string.
    Decode { hex: String },
}

#[derive(Args, Debug)]
pub struct EncodeArgs {
    /// Body text.
    #[arg(long, default_value = "")]
    pub text: String,
    /// Addressing action header.
    #[arg(long, default_value = DEFAULT_ACTION)]
    pub action: String,
    /// Addressing To header.
    #[arg(long)]
    pub to: Option<String>,
    /// Largest encoded message accepted, in bytes.
    #[arg(long, default_value = "65536")]
    pub max_message_size: usize,
    /// Wrap the message in a simplex framing stream addressed to --to.
    #[arg(long)]
    pub framed: bool,
    #[command(flatten)]
    pub encoder: EncoderArgs,
}

#[derive(Args, Debug)]
pub struct DecodeArgs {
    /// Encoded message as hex.
    pub hex: String,
    /// Content type to check the bytes against. Default: the encoder's own.
    #[arg(long)]
    pub content_type: Option<String>,
    /// Largest message accepted, before or after decompression, in bytes.
    #[arg(long, default_value = "65536")]
    pub max_message_size: usize,
    /// Read the message from a framing stream. Its encoding record supplies
    /// the content type unless --content-type is given.
    #[arg(long)]
    pub framed: bool,
    #[command(flatten)]
    pub encoder: EncoderArgs,
}

#[derive(Args, Debug)]
pub struct ContentTypeArgs {
    /// Report whether the encoder accepts this content type.
    #[arg(long, value_name = "CONTENT_TYPE")]
    pub check: Option<String>,
    #[command(flatten)]
    pub encoder: EncoderArgs,
}

#[derive(Args, Debug)]
pub struct RequestArgs {
    /// Logical address of the remote endpoint.
    #[arg(default_value_t = format!("{LOOPBACK_SCHEME}://localhost/echo"))]
    pub address: String,
    /// Physical address, if different from the logical one.
    #[arg(long)]
    pub via: Option<String>,
    /// Body text.
    #[arg(long, default_value = "")]
    pub text: String,
    /// Addressing action header.
    #[arg(long, default_value = DEFAULT_ACTION)]
    pub action: String,
    /// Payload compression: none, gzip or deflate.
    #[arg(long, default_value = "none")]
    pub compression: CompressionFormat,
    /// Budget for each of open, request and close (e.g. 5s, 500ms).
    #[arg(long, default_value = "5s")]
    pub timeout: String,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}
