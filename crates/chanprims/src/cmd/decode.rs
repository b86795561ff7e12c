use std::io::Cursor;

use chanprims_frame::{BufferManager, FrameReader};
use chanprims_message::PooledMessageBytes;
use serde::Serialize;

use crate::cmd::varint::parse_hex;
use crate::cmd::DecodeArgs;
use crate::exit::{frame_error, message_error, CliError, CliResult, DATA_INVALID, SUCCESS};
use crate::output::{print_record, schema_id, OutputFormat};

#[derive(Serialize)]
struct DecodedMessage {
    schema_id: String,
    version: String,
    action: Option<String>,
    message_id: Option<String>,
    to: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    via: Option<String>,
    content_type: String,
    body: String,
}

pub fn run(args: DecodeArgs, format: OutputFormat) -> CliResult<i32> {
    let encoder = args.encoder.encoder()?;
    let mut data = parse_hex(&args.hex)?;
    let buffers = BufferManager::unpooled();
    let mut via = None;
    let mut framed_content_type = None;
    if args.framed {
        let mut reader = FrameReader::with_max_payload(Cursor::new(data), args.max_message_size);
        let envelope = reader
            .read_envelope()
            .map_err(|err| frame_error("reading frames failed", err))?
            .ok_or_else(|| CliError::new(DATA_INVALID, "stream ended before any envelope"))?;
        tracing::debug!(size = envelope.len(), via = ?reader.via(), "envelope unframed");
        via = reader.via().map(str::to_string);
        framed_content_type = reader.content_type().map(str::to_string);
        data = envelope.to_vec();
    }
    let content_type = args
        .content_type
        .or(framed_content_type)
        .unwrap_or_else(|| encoder.content_type().to_string());

    let len = data.len();
    let bytes = PooledMessageBytes::new(data, 0, len)
        .map_err(|err| message_error("decode failed", err))?;
    let mut message = encoder
        .read_message(bytes, args.max_message_size, &buffers, Some(&content_type))
        .map_err(|err| message_error("decode failed", err))?;
    let body = message
        .read_body_text()
        .map_err(|err| message_error("reading body failed", err))?;

    let headers = message.headers();
    let record = DecodedMessage {
        schema_id: schema_id("message-decoded"),
        version: message.version().to_string(),
        action: headers.action.clone(),
        message_id: headers.message_id.as_ref().map(|id| id.as_str().to_string()),
        to: headers.to.clone(),
        via,
        content_type,
        body: body.clone(),
    };
    print_record(&record, Some(body.as_bytes()), format);
    Ok(SUCCESS)
}
