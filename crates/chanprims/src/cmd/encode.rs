use chanprims_binding::LOOPBACK_SCHEME;
use chanprims_frame::{
    BufferManager, FrameWriter, FramingMode, PreambleEncoding, DEFAULT_MAX_BUFFER_POOL_SIZE,
};
use chanprims_message::{Message, MessageVersion, TextBodyWriter};
use serde::Serialize;

use crate::cmd::EncodeArgs;
use crate::exit::{frame_error, message_error, CliError, CliResult, SUCCESS, USAGE};
use crate::output::{print_record, schema_id, OutputFormat};

pub const BODY_ELEMENT: &str = "text";
pub const BODY_NAMESPACE: &str = "urn:chanprims";

#[derive(Serialize)]
struct EncodedMessage {
    schema_id: String,
    action: String,
    content_type: String,
    framed: bool,
    size: usize,
    hex: String,
}

pub fn run(args: EncodeArgs, format: OutputFormat) -> CliResult<i32> {
    let encoder = args.encoder.encoder()?;
    let buffers = buffer_manager(args.max_message_size)?;

    let mut message = Message::with_body_writer(
        MessageVersion::Soap12WSAddressing10,
        args.action.clone(),
        TextBodyWriter::new(BODY_ELEMENT, BODY_NAMESPACE, args.text.as_str()),
    );
    message.headers_mut().to = args.to.clone();

    let bytes = encoder
        .write_message(&mut message, args.max_message_size, &buffers, 0)
        .map_err(|err| message_error("encode failed", err))?;
    tracing::debug!(
        size = bytes.len(),
        content_type = encoder.content_type(),
        "message encoded"
    );

    let output = if args.framed {
        let via = args
            .to
            .clone()
            .unwrap_or_else(|| format!("{LOOPBACK_SCHEME}://localhost/echo"));
        let framed = frame_message(
            bytes.as_slice(),
            &via,
            encoder.content_type(),
            args.max_message_size,
        );
        bytes.release(&buffers);
        framed?
    } else {
        let raw = bytes.as_slice().to_vec();
        bytes.release(&buffers);
        raw
    };

    let record = EncodedMessage {
        schema_id: schema_id("message-encoded"),
        action: args.action,
        content_type: encoder.content_type().to_string(),
        framed: args.framed,
        size: output.len(),
        hex: hex::encode(&output),
    };
    print_record(&record, Some(output.as_slice()), format);
    Ok(SUCCESS)
}

/// A one-message simplex stream: preamble, the envelope, then `End`.
fn frame_message(
    message: &[u8],
    via: &str,
    content_type: &str,
    max_message_size: usize,
) -> CliResult<Vec<u8>> {
    let framing = |err| frame_error("framing failed", err);
    let mut writer = FrameWriter::with_max_payload(Vec::new(), max_message_size);
    let encoding = PreambleEncoding::for_content_type(content_type);
    writer
        .write_preamble(FramingMode::Simplex, via, encoding)
        .map_err(framing)?;
    writer.write_preamble_end().map_err(framing)?;
    writer.write_envelope(message).map_err(framing)?;
    writer.write_end().map_err(framing)?;
    Ok(writer.into_inner())
}

pub(crate) fn buffer_manager(max_message_size: usize) -> CliResult<BufferManager> {
    let max_buffer_size = i32::try_from(max_message_size).map_err(|_| {
        CliError::new(
            USAGE,
            format!("--max-message-size must not exceed {}", i32::MAX),
        )
    })?;
    BufferManager::new(DEFAULT_MAX_BUFFER_POOL_SIZE, max_buffer_size)
        .map_err(|err| frame_error("invalid buffer limits", err))
}
