use std::any::{Any, TypeId};
use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;

use chanprims_channel::{ChannelFactory, ChannelShape};

use crate::binding::BindingDescription;
use crate::element::BindingElement;
use crate::error::{BindingError, Result};
use crate::parameters::BindingParameterCollection;

/// Builder state threaded through the elements of one build.
///
/// Each remaining element is consumed exactly once, front to back.
/// Speculative queries run on a [`fork`](Self::fork) and leave this context
/// untouched.
pub struct BindingContext {
    binding: Arc<BindingDescription>,
    remaining: VecDeque<Arc<dyn BindingElement>>,
    parameters: BindingParameterCollection,
}

impl BindingContext {
    pub fn new(
        binding: BindingDescription,
        elements: impl IntoIterator<Item = Arc<dyn BindingElement>>,
        parameters: BindingParameterCollection,
    ) -> Self {
        Self {
            binding: Arc::new(binding),
            remaining: elements.into_iter().collect(),
            parameters,
        }
    }

    pub fn binding(&self) -> &BindingDescription {
        &self.binding
    }

    pub fn binding_parameters(&self) -> &BindingParameterCollection {
        &self.parameters
    }

    pub fn binding_parameters_mut(&mut self) -> &mut BindingParameterCollection {
        &mut self.parameters
    }

    pub fn remaining_count(&self) -> usize {
        self.remaining.len()
    }

    pub fn remaining_elements(&self) -> impl Iterator<Item = &dyn BindingElement> {
        self.remaining.iter().map(|element| &**element)
    }

    /// Consume the next element and let it build the rest of the stack.
    pub fn build_inner_channel_factory(
        &mut self,
        shape: ChannelShape,
    ) -> Result<Arc<dyn ChannelFactory>> {
        let element = self
            .remaining
            .pop_front()
            .ok_or(BindingError::NoChannelBuilder { shape })?;
        tracing::trace!(
            binding = self.binding.name(),
            element = element.name(),
            %shape,
            "building channel factory layer"
        );
        element.build_channel_factory(self, shape)
    }

    pub fn can_build_inner_channel_factory(&self, shape: ChannelShape) -> bool {
        let mut fork = self.fork();
        match fork.remaining.pop_front() {
            Some(element) => element.can_build_channel_factory(&fork, shape),
            None => false,
        }
    }

    pub fn get_inner_property<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        self.inner_property(TypeId::of::<T>())
            .and_then(|value| value.downcast::<T>().ok())
    }

    /// Untyped form of [`get_inner_property`](Self::get_inner_property).
    pub fn inner_property(&self, type_id: TypeId) -> Option<Arc<dyn Any + Send + Sync>> {
        let mut fork = self.fork();
        let element = fork.remaining.pop_front()?;
        element.property(&fork, type_id)
    }

    /// Fail if any element was skipped by the build.
    pub fn validate_binding_elements_consumed(&self) -> Result<()> {
        if self.remaining.is_empty() {
            return Ok(());
        }
        Err(BindingError::ElementsNotConsumed {
            remaining: self
                .remaining
                .iter()
                .map(|element| element.name().to_owned())
                .collect(),
        })
    }

    /// A copy sharing the binding description and the elements themselves.
    pub fn fork(&self) -> Self {
        Self {
            binding: Arc::clone(&self.binding),
            remaining: self.remaining.clone(),
            parameters: self.parameters.clone(),
        }
    }
}

impl fmt::Debug for BindingContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BindingContext")
            .field("binding", &self.binding.name())
            .field(
                "remaining",
                &self.remaining_elements().map(|e| e.name()).collect::<Vec<_>>(),
            )
            .field("parameters", &self.parameters)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    /// Counts how often it is asked to build.
    #[derive(Debug, Default)]
    struct Counting {
        builds: AtomicUsize,
    }

    impl BindingElement for Counting {
        fn name(&self) -> &str {
            "counting"
        }

        fn clone_element(&self) -> Box<dyn BindingElement> {
            Box::new(Counting::default())
        }

        fn build_channel_factory(
            &self,
            context: &mut BindingContext,
            shape: ChannelShape,
        ) -> Result<Arc<dyn ChannelFactory>> {
            self.builds.fetch_add(1, Ordering::SeqCst);
            context.build_inner_channel_factory(shape)
        }

        fn property(
            &self,
            context: &BindingContext,
            type_id: TypeId,
        ) -> Option<Arc<dyn Any + Send + Sync>> {
            if type_id == TypeId::of::<usize>() {
                return Some(Arc::new(context.remaining_count()));
            }
            context.inner_property(type_id)
        }

        fn as_any(&self) -> &dyn Any {
            self
        }
    }

    fn element(counting: &Arc<Counting>) -> Arc<dyn BindingElement> {
        counting.clone()
    }

    fn context(elements: Vec<Arc<dyn BindingElement>>) -> BindingContext {
        BindingContext::new(
            BindingDescription::new("test", "urn:test"),
            elements,
            BindingParameterCollection::new(),
        )
    }

    #[test]
    fn exhausted_context_has_no_builder() {
        let counting = Arc::new(Counting::default());
        let mut ctx = context(vec![
            element(&counting),
            element(&Arc::new(Counting::default())),
        ]);

        let err = ctx.build_inner_channel_factory(ChannelShape::Request).unwrap_err();
        assert!(matches!(
            err,
            BindingError::NoChannelBuilder {
                shape: ChannelShape::Request
            }
        ));
        assert_eq!(counting.builds.load(Ordering::SeqCst), 1);
        assert_eq!(ctx.remaining_count(), 0);
        ctx.validate_binding_elements_consumed().unwrap();
    }

    #[test]
    fn queries_run_on_a_fork() {
        let ctx = context(vec![
            element(&Arc::new(Counting::default())),
            element(&Arc::new(Counting::default())),
        ]);
        assert!(!ctx.can_build_inner_channel_factory(ChannelShape::Output));
        // the first element answers with what was left below it
        assert_eq!(ctx.get_inner_property::<usize>().as_deref(), Some(&1));
        assert!(ctx.get_inner_property::<String>().is_none());
        assert_eq!(ctx.remaining_count(), 2);
    }

    #[test]
    fn fork_shares_elements() {
        let counting = Arc::new(Counting::default());
        let ctx = context(vec![element(&counting)]);
        let mut fork = ctx.fork();
        fork.binding_parameters_mut().insert(1u8);
        let _ = fork.build_inner_channel_factory(ChannelShape::Input);

        assert_eq!(counting.builds.load(Ordering::SeqCst), 1);
        assert_eq!(ctx.remaining_count(), 1);
        assert!(ctx.binding_parameters().is_empty());
    }

    #[test]
    fn leftovers_are_reported_by_name() {
        let ctx = context(vec![element(&Arc::new(Counting::default()))]);
        match ctx.validate_binding_elements_consumed() {
            Err(BindingError::ElementsNotConsumed { remaining }) => {
                assert_eq!(remaining, vec!["counting".to_owned()]);
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }
}
