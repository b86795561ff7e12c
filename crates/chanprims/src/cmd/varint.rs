use chanprims_frame::{decode_varint, varint};
use serde::Serialize;

use crate::cmd::{VarintAction, VarintArgs};
use crate::exit::{frame_error, CliError, CliResult, DATA_INVALID, SUCCESS, USAGE};
use crate::output::{print_record, schema_id, OutputFormat};

#[derive(Serialize)]
struct EncodedVarint {
    schema_id: String,
    value: u32,
    size: usize,
    hex: String,
}

#[derive(Serialize)]
struct DecodedVarint {
    schema_id: String,
    value: u32,
    consumed: usize,
    trailing: usize,
}

pub fn run(args: VarintArgs, format: OutputFormat) -> CliResult<i32> {
    match args.action {
        VarintAction::Encode { values } => {
            for value in values {
                let bytes = encode(value)?;
                let record = EncodedVarint {
                    schema_id: schema_id("varint-encoded"),
                    value,
                    size: bytes.len(),
                    hex: hex::encode(&bytes),
                };
                print_record(&record, Some(&bytes), format);
            }
        }
        VarintAction::Decode { hex } => {
            let bytes = parse_hex(&hex)?;
            let (value, consumed) = decode(&bytes)?;
            let record = DecodedVarint {
                schema_id: schema_id("varint-decoded"),
                value,
                consumed,
                trailing: bytes.len() - consumed,
            };
            print_record(&record, None, format);
        }
    }
    Ok(SUCCESS)
}

fn encode(value: u32) -> CliResult<Vec<u8>> {
    let mut bytes = Vec::with_capacity(varint::MAX_VARINT_LEN);
    varint::encode(value, &mut bytes).map_err(|err| frame_error("encode failed", err))?;
    Ok(bytes)
}

fn decode(bytes: &[u8]) -> CliResult<(u32, usize)> {
    decode_varint(bytes)
        .map_err(|err| frame_error("decode failed", err))?
        .ok_or_else(|| CliError::new(DATA_INVALID, "decode failed: input ends inside a varint"))
}

pub(crate) fn parse_hex(input: &str) -> CliResult<Vec<u8>> {
    let compact: String = input.chars().filter(|c| !c.is_whitespace()).collect();
    hex::decode(&compact).map_err(|err| CliError::new(USAGE, format!("invalid hex input: {err}")))
}
