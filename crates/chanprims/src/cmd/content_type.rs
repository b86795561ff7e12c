use serde::Serialize;

use crate::cmd::ContentTypeArgs;
use crate::exit::{CliResult, FAILURE, SUCCESS};
use crate::output::{print_record, schema_id, OutputFormat};

#[derive(Serialize)]
struct ContentTypeReport {
    schema_id: String,
    content_type: String,
    media_type: String,
    checked: Option<String>,
    supported: Option<bool>,
}

pub fn run(args: ContentTypeArgs, format: OutputFormat) -> CliResult<i32> {
    let encoder = args.encoder.encoder()?;
    let supported = args
        .check
        .as_deref()
        .map(|candidate| encoder.is_content_type_supported(candidate));

    let record = ContentTypeReport {
        schema_id: schema_id("content-type"),
        content_type: encoder.content_type().to_string(),
        media_type: encoder.media_type().to_string(),
        checked: args.check,
        supported,
    };
    print_record(&record, Some(encoder.content_type().as_bytes()), format);

    Ok(match supported {
        Some(false) => FAILURE,
        _ => SUCCESS,
    })
}
