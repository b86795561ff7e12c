use std::any::{Any, TypeId};
use std::sync::{Arc, OnceLock};

use chanprims_channel::{ChannelFactory, ChannelShape};

use crate::context::BindingContext;
use crate::element::BindingElement;
use crate::error::Result;
use crate::parameters::BindingParameterCollection;

/// Pins the binding parameters of the first build.
///
/// The first build through this element stores its parameters; every later
/// build, including those through clones of the element, replaces its own
/// parameters with the stored ones. The cache is written once and never
/// reset.
#[derive(Debug, Clone, Default)]
pub struct ChannelDemuxerBindingElement {
    cached: Arc<OnceLock<BindingParameterCollection>>,
}

impl ChannelDemuxerBindingElement {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_cached(&self) -> bool {
        self.cached.get().is_some()
    }

    fn replay(&self, context: &mut BindingContext) {
        let parameters = self.cached.get_or_init(|| {
            tracing::debug!(
                binding = context.binding().name(),
                parameters = context.binding_parameters().len(),
                "demuxer cached binding parameters"
            );
            context.binding_parameters().clone()
        });
        *context.binding_parameters_mut() = parameters.clone();
    }

    /// Queries see the cached parameters but never populate the cache.
    fn query_context(&self, context: &BindingContext) -> BindingContext {
        let mut fork = context.fork();
        if let Some(parameters) = self.cached.get() {
            *fork.binding_parameters_mut() = parameters.clone();
        }
        fork
    }
}

impl BindingElement for ChannelDemuxerBindingElement {
    fn name(&self) -> &str {
        "channel demuxer"
    }

    fn clone_element(&self) -> Box<dyn BindingElement> {
        Box::new(self.clone())
    }

    fn build_channel_factory(
        &self,
        context: &mut BindingContext,
        shape: ChannelShape,
    ) -> Result<Arc<dyn ChannelFactory>> {
        self.replay(context);
        context.build_inner_channel_factory(shape)
    }

    fn can_build_channel_factory(&self, context: &BindingContext, shape: ChannelShape) -> bool {
        self.query_context(context)
            .can_build_inner_channel_factory(shape)
    }

    fn property(
        &self,
        context: &BindingContext,
        type_id: TypeId,
    ) -> Option<Arc<dyn Any + Send + Sync>> {
        self.query_context(context).inner_property(type_id)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
