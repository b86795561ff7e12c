use std::time::{Duration, Instant};

use chanprims_binding::{
    Binding, BindingElementCollection, BindingParameterCollection,
    BinaryMessageEncodingBindingElement, LoopbackTransportBindingElement, RequestChannelKind,
};
use chanprims_channel::{Channel, RequestSender};
use chanprims_message::{CompressionFormat, Message, MessageVersion, TextBodyWriter};
use serde::Serialize;

use crate::cmd::encode::{BODY_ELEMENT, BODY_NAMESPACE};
use crate::cmd::RequestArgs;
use crate::exit::{
    binding_error, channel_error, io_error, message_error, CliError, CliResult, SUCCESS, USAGE,
};
use crate::output::{print_record, schema_id, OutputFormat};

#[derive(Debug, Serialize)]
struct ReplyReceived {
    schema_id: String,
    binding: String,
    address: String,
    action: Option<String>,
    relates_to: Option<String>,
    body: String,
    elapsed_ms: u128,
}

pub fn run(args: RequestArgs, format: OutputFormat) -> CliResult<i32> {
    let timeout = parse_duration(&args.timeout)?;
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|err| io_error("failed to start runtime", err))?;
    let record = runtime.block_on(request(&args, timeout))?;
    print_record(&record, Some(record.body.as_bytes()), format);
    Ok(SUCCESS)
}

fn loopback_binding(compression: CompressionFormat) -> Binding {
    let mut encoding = BinaryMessageEncodingBindingElement::new();
    encoding.set_compression(compression);
    let mut elements = BindingElementCollection::new();
    elements.push(encoding);
    elements.push(LoopbackTransportBindingElement::new());
    Binding::new("loopback", elements)
}

async fn request(args: &RequestArgs, timeout: Duration) -> CliResult<ReplyReceived> {
    let started = Instant::now();
    let binding = loopback_binding(args.compression);
    let factory = binding
        .build_channel_factory::<RequestChannelKind>(BindingParameterCollection::new())
        .map_err(|err| binding_error("building the channel stack failed", err))?;
    factory
        .open(timeout)
        .await
        .map_err(|err| channel_error("opening the factory failed", err))?;

    let result = async {
        let channel = factory
            .create_channel_via(&args.address, args.via.as_deref())
            .map_err(|err| channel_error("creating the channel failed", err))?;
        channel
            .open(timeout)
            .await
            .map_err(|err| channel_error("opening the channel failed", err))?;

        let message = Message::with_body_writer(
            MessageVersion::Soap12WSAddressing10,
            args.action.clone(),
            TextBodyWriter::new(BODY_ELEMENT, BODY_NAMESPACE, args.text.as_str()),
        );
        let mut reply = channel
            .request(message, timeout)
            .await
            .map_err(|err| channel_error("request failed", err))?;
        let body = reply
            .read_body_text()
            .map_err(|err| message_error("reading the reply failed", err))?;
        Ok::<_, CliError>((reply, body))
    }
    .await;

    if let Err(err) = factory.close(timeout).await {
        tracing::warn!(error = %err, "factory close failed; aborting");
        factory.abort();
    }
    let (reply, body) = result?;

    tracing::debug!(
        binding = binding.name(),
        address = %args.address,
        "reply received"
    );
    let headers = reply.headers();
    Ok(ReplyReceived {
        schema_id: schema_id("reply-received"),
        binding: binding.name().to_string(),
        address: args.address.clone(),
        action: headers.action.clone(),
        relates_to: headers.relates_to.as_ref().map(|id| id.as_str().to_string()),
        body,
        elapsed_ms: started.elapsed().as_millis(),
    })
}

fn parse_duration(input: &str) -> CliResult<Duration> {
    let input = input.trim();
    if input.is_empty() {
        return Err(CliError::new(USAGE, "duration must not be empty"));
    }

    let (number, unit) = if let Some(num) = input.strip_suffix("ms") {
        (num, "ms")
    } else if let Some(num) = input.strip_suffix('s') {
        (num, "s")
    } else {
        (input, "s")
    };

    let value: u64 = number
        .parse()
        .map_err(|_| CliError::new(USAGE, format!("invalid duration value: {input}")))?;

    if value == 0 {
        return Err(CliError::new(USAGE, "duration must be greater than zero"));
    }

    Ok(match unit {
        "ms" => Duration::from_millis(value),
        _ => Duration::from_secs(value),
    })
}
