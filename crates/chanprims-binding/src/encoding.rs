use std::any::{Any, TypeId};
use std::sync::Arc;

use chanprims_channel::{ChannelFactory, ChannelShape};
use chanprims_message::{
    BinaryEncoderSettings, BinaryMessageEncoderFactory, CompressionFormat, EnvelopeVersion,
    MessageEncoderFactory, MessageVersion, ReaderQuotas,
};

use crate::context::BindingContext;
use crate::element::{add_message_encoding, BindingElement, MessageEncodingBindingElement};
use crate::error::{BindingError, Result};

/// Selects the binary message encoder for the stack below it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BinaryMessageEncodingBindingElement {
    settings: BinaryEncoderSettings,
}

impl BinaryMessageEncodingBindingElement {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn settings(&self) -> &BinaryEncoderSettings {
        &self.settings
    }

    pub fn max_read_pool_size(&self) -> usize {
        self.settings.max_read_pool_size
    }

    pub fn set_max_read_pool_size(&mut self, value: i32) -> Result<()> {
        self.settings.max_read_pool_size = at_least("max_read_pool_size", value, 1)?;
        Ok(())
    }

    pub fn max_write_pool_size(&self) -> usize {
        self.settings.max_write_pool_size
    }

    pub fn set_max_write_pool_size(&mut self, value: i32) -> Result<()> {
        self.settings.max_write_pool_size = at_least("max_write_pool_size", value, 1)?;
        Ok(())
    }

    pub fn max_session_size(&self) -> usize {
        self.settings.max_session_size
    }

    pub fn set_max_session_size(&mut self, value: i32) -> Result<()> {
        self.settings.max_session_size = at_least("max_session_size", value, 0)?;
        Ok(())
    }

    pub fn reader_quotas(&self) -> &ReaderQuotas {
        &self.settings.reader_quotas
    }

    /// Every quota must be positive.
    pub fn set_reader_quotas(&mut self, quotas: ReaderQuotas) -> Result<()> {
        let limits = [
            ("max_depth", quotas.max_depth),
            ("max_string_content_length", quotas.max_string_content_length),
            ("max_array_length", quotas.max_array_length),
            ("max_bytes_per_read", quotas.max_bytes_per_read),
            ("max_name_table_char_count", quotas.max_name_table_char_count),
        ];
        if let Some((quota, _)) = limits.iter().find(|(_, limit)| *limit == 0) {
            return Err(BindingError::argument(
                "reader_quotas",
                format!("{quota} must be positive"),
            ));
        }
        self.settings.reader_quotas = quotas;
        Ok(())
    }

    pub fn compression(&self) -> CompressionFormat {
        self.settings.compression
    }

    pub fn set_compression(&mut self, compression: CompressionFormat) {
        self.settings.compression = compression;
    }

    /// Binary encoding only carries SOAP 1.2 envelopes.
    pub fn set_message_version(&mut self, version: MessageVersion) -> Result<()> {
        if version.envelope() != EnvelopeVersion::Soap12 {
            return Err(BindingError::argument(
                "message_version",
                format!("binary encoding requires SOAP 1.2, got {version}"),
            ));
        }
        self.settings.message_version = version;
        Ok(())
    }
}

fn at_least(name: &'static str, value: i32, min: i32) -> Result<usize> {
    if value < min {
        return Err(BindingError::argument(
            name,
            format!("must be at least {min}, got {value}"),
        ));
    }
    usize::try_from(value).map_err(|_| BindingError::argument(name, "out of range"))
}

impl BindingElement for BinaryMessageEncodingBindingElement {
    fn name(&self) -> &str {
        "binary message encoding"
    }

    fn clone_element(&self) -> Box<dyn BindingElement> {
        Box::new(self.clone())
    }

    fn build_channel_factory(
        &self,
        context: &mut BindingContext,
        shape: ChannelShape,
    ) -> Result<Arc<dyn ChannelFactory>> {
        add_message_encoding(context.binding_parameters_mut(), Arc::new(self.clone()));
        context.build_inner_channel_factory(shape)
    }

    fn can_build_channel_factory(&self, context: &BindingContext, shape: ChannelShape) -> bool {
        let mut context = context.fork();
        add_message_encoding(context.binding_parameters_mut(), Arc::new(self.clone()));
        context.can_build_inner_channel_factory(shape)
    }

    fn property(
        &self,
        context: &BindingContext,
        type_id: TypeId,
    ) -> Option<Arc<dyn Any + Send + Sync>> {
        if type_id == TypeId::of::<MessageVersion>() {
            return Some(Arc::new(self.settings.message_version));
        }
        if type_id == TypeId::of::<ReaderQuotas>() {
            return Some(Arc::new(self.settings.reader_quotas));
        }
        context.inner_property(type_id)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl MessageEncodingBindingElement for BinaryMessageEncodingBindingElement {
    fn message_version(&self) -> MessageVersion {
        self.settings.message_version
    }

    fn create_message_encoder_factory(&self) -> Result<Arc<dyn MessageEncoderFactory>> {
        Ok(Arc::new(BinaryMessageEncoderFactory::new(
            self.settings.clone(),
        )?))
    }
}
