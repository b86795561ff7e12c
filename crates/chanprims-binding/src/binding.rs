//! Bindings: an ordered element list plus the description of the endpoint.

use std::any::{Any, TypeId};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chanprims_channel::{ChannelFactory, ChannelShape};
use chanprims_message::MessageVersion;

use crate::context::BindingContext;
use crate::element::{BindingElement, TransportBindingElement};
use crate::error::{BindingError, Result};
use crate::parameters::BindingParameterCollection;
use crate::typed::{ChannelKind, TypedChannelFactory};

pub const DEFAULT_NAMESPACE: &str = "http://tempuri.org/";

/// Default operation budgets handed to the factories a binding builds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BindingTimeouts {
    pub open_timeout: Duration,
    pub close_timeout: Duration,
    pub send_timeout: Duration,
    pub receive_timeout: Duration,
}

impl Default for BindingTimeouts {
    fn default() -> Self {
        Self {
            open_timeout: Duration::from_secs(60),
            close_timeout: Duration::from_secs(60),
            send_timeout: Duration::from_secs(60),
            receive_timeout: Duration::from_secs(600),
        }
    }
}

/// What a build knows about the binding it came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BindingDescription {
    name: String,
    namespace: String,
    timeouts: BindingTimeouts,
}

impl BindingDescription {
    pub fn new(name: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
            timeouts: BindingTimeouts::default(),
        }
    }

    pub fn with_timeouts(mut self, timeouts: BindingTimeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn timeouts(&self) -> &BindingTimeouts {
        &self.timeouts
    }
}

/// Binding elements in stack order, outermost first.
///
/// Cloning the collection clones every element.
#[derive(Debug, Clone, Default)]
pub struct BindingElementCollection {
    elements: Vec<Box<dyn BindingElement>>,
}

impl BindingElementCollection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, element: impl BindingElement + 'static) {
        self.elements.push(Box::new(element));
    }

    pub fn push_boxed(&mut self, element: Box<dyn BindingElement>) {
        self.elements.push(element);
    }

    /// Panics if `index > len`, like `Vec::insert`.
    pub fn insert(&mut self, index: usize, element: Box<dyn BindingElement>) {
        self.elements.insert(index, element);
    }

    pub fn remove(&mut self, index: usize) -> Option<Box<dyn BindingElement>> {
        (index < self.elements.len()).then(|| self.elements.remove(index))
    }

    pub fn len(&self) -> usize {
        self.elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &dyn BindingElement> {
        self.elements.iter().map(|element| &**element)
    }

    pub fn last(&self) -> Option<&dyn BindingElement> {
        self.elements.last().map(|element| &**element)
    }

    /// The first element of type `T`.
    pub fn find<T: BindingElement + 'static>(&self) -> Option<&T> {
        self.iter()
            .find_map(|element| element.as_any().downcast_ref::<T>())
    }

    /// The terminating transport, if the last element is one.
    pub fn transport(&self) -> Option<&dyn TransportBindingElement> {
        self.last().and_then(|element| element.as_transport())
    }
}

impl FromIterator<Box<dyn BindingElement>> for BindingElementCollection {
    fn from_iter<I: IntoIterator<Item = Box<dyn BindingElement>>>(iter: I) -> Self {
        Self {
            elements: iter.into_iter().collect(),
        }
    }
}

/// A named, ordered stack of binding elements.
///
/// Every build works on fresh clones of the elements, so one binding can be
/// built any number of times.
#[derive(Clone)]
pub struct Binding {
    description: BindingDescription,
    elements: BindingElementCollection,
}

impl Binding {
    pub fn new(name: impl Into<String>, elements: BindingElementCollection) -> Self {
        Self {
            description: BindingDescription::new(name, DEFAULT_NAMESPACE),
            elements,
        }
    }

    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.description.namespace = namespace.into();
        self
    }

    pub fn with_timeouts(mut self, timeouts: BindingTimeouts) -> Self {
        self.description.timeouts = timeouts;
        self
    }

    pub fn name(&self) -> &str {
        self.description.name()
    }

    pub fn namespace(&self) -> &str {
        self.description.namespace()
    }

    pub fn timeouts(&self) -> &BindingTimeouts {
        self.description.timeouts()
    }

    pub fn description(&self) -> &BindingDescription {
        &self.description
    }

    pub fn elements(&self) -> &BindingElementCollection {
        &self.elements
    }

    pub fn elements_mut(&mut self) -> &mut BindingElementCollection {
        &mut self.elements
    }

    /// The transport's URI scheme.
    pub fn scheme(&self) -> Option<&str> {
        self.elements.transport().map(|transport| transport.scheme())
    }

    /// The message version the stack resolves to with no extra parameters.
    pub fn message_version(&self) -> Option<MessageVersion> {
        self.get_property::<MessageVersion>(&BindingParameterCollection::new())
            .map(|version| *version)
    }

    /// Check the structural rules every buildable binding obeys.
    pub fn ensure_invariants(&self) -> Result<()> {
        let name = self.name();
        let transports = self
            .elements
            .iter()
            .filter(|element| element.as_transport().is_some())
            .count();
        match transports {
            0 => {
                return Err(BindingError::InvalidBinding(format!(
                    "binding '{name}' has no transport binding element"
                )))
            }
            1 => {}
            n => {
                return Err(BindingError::InvalidBinding(format!(
                    "binding '{name}' has {n} transport binding elements; exactly one is allowed"
                )))
            }
        }
        let Some(transport) = self.elements.transport() else {
            return Err(BindingError::InvalidBinding(format!(
                "the transport binding element of binding '{name}' must be the last element"
            )));
        };
        if transport.scheme().is_empty() {
            return Err(BindingError::InvalidBinding(format!(
                "the transport '{}' of binding '{name}' has an empty scheme",
                transport.name()
            )));
        }
        if self.message_version().is_none() {
            return Err(BindingError::InvalidBinding(format!(
                "binding '{name}' does not resolve a message version"
            )));
        }
        Ok(())
    }

    /// Build a channel factory for channels of kind `K`.
    pub fn build_channel_factory<K: ChannelKind>(
        &self,
        parameters: BindingParameterCollection,
    ) -> Result<TypedChannelFactory<K>> {
        let factory = self.build_channel_factory_for(K::SHAPE, parameters)?;
        Ok(TypedChannelFactory::new(factory, *self.timeouts()))
    }

    /// Build a channel factory for a shape chosen at run time.
    pub fn build_channel_factory_for(
        &self,
        shape: ChannelShape,
        parameters: BindingParameterCollection,
    ) -> Result<Arc<dyn ChannelFactory>> {
        self.ensure_invariants()?;
        let mut context = self.context(parameters);
        let factory = context.build_inner_channel_factory(shape)?;
        context.validate_binding_elements_consumed()?;
        if factory.shape() != shape {
            return Err(BindingError::InvalidBinding(format!(
                "binding '{}' built a {} channel factory when {shape} was requested",
                self.name(),
                factory.shape()
            )));
        }
        tracing::debug!(
            binding = self.name(),
            %shape,
            elements = self.elements.len(),
            "channel factory built"
        );
        Ok(factory)
    }

    pub fn can_build_channel_factory<K: ChannelKind>(
        &self,
        parameters: &BindingParameterCollection,
    ) -> bool {
        self.ensure_invariants().is_ok()
            && self
                .context(parameters.clone())
                .can_build_inner_channel_factory(K::SHAPE)
    }

    /// A typed property answered by the outermost element that knows it.
    pub fn get_property<T: Any + Send + Sync>(
        &self,
        parameters: &BindingParameterCollection,
    ) -> Option<Arc<T>> {
        self.context(parameters.clone())
            .inner_property(TypeId::of::<T>())
            .and_then(|value| value.downcast::<T>().ok())
    }

    fn context(&self, parameters: BindingParameterCollection) -> BindingContext {
        let elements = self
            .elements
            .iter()
            .map(|element| Arc::<dyn BindingElement>::from(element.clone_element()));
        BindingContext::new(self.description.clone(), elements, parameters)
    }
}

impl fmt::Debug for Binding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Binding")
            .field("name", &self.name())
            .field("namespace", &self.namespace())
            .field(
                "elements",
                &self.elements.iter().map(|e| e.name()).collect::<Vec<_>>(),
            )
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoding::BinaryMessageEncodingBindingElement;
    use crate::loopback::LoopbackTransportBindingElement;
    use crate::typed::{InputChannelKind, OutputChannelKind, RequestChannelKind};

    /// A transport that answers nothing and builds nothing.
    #[derive(Debug, Clone)]
    struct Inert {
        scheme: &'static str,
    }

    impl BindingElement for Inert {
        fn name(&self) -> &str {
            "inert transport"
        }

        fn clone_element(&self) -> Box<dyn BindingElement> {
            Box::new(self.clone())
        }

        fn can_build_channel_factory(
            &self,
            _context: &BindingContext,
            _shape: ChannelShape,
        ) -> bool {
            false
        }

        fn build_channel_factory(
            &self,
            _context: &mut BindingContext,
            shape: ChannelShape,
        ) -> Result<Arc<dyn ChannelFactory>> {
            Err(BindingError::InvalidBinding(format!("cannot build {shape}")))
        }

        fn property(
            &self,
            _context: &BindingContext,
            _type_id: TypeId,
        ) -> Option<Arc<dyn Any + Send + Sync>> {
            None
        }

        fn as_transport(&self) -> Option<&dyn TransportBindingElement> {
            Some(self)
        }

        fn as_any(&self) -> &dyn Any {
            self
        }
    }

    impl TransportBindingElement for Inert {
        fn scheme(&self) -> &str {
            self.scheme
        }

        fn max_buffer_pool_size(&self) -> i64 {
            0
        }

        fn max_received_message_size(&self) -> i64 {
            1
        }

        fn manual_addressing(&self) -> bool {
            false
        }
    }

    fn invalid_message(binding: &Binding) -> String {
        match binding.ensure_invariants() {
            Err(BindingError::InvalidBinding(message)) => message,
            other => panic!("expected an invalid binding, got {other:?}"),
        }
    }

    fn elements(list: Vec<Box<dyn BindingElement>>) -> BindingElementCollection {
        list.into_iter().collect()
    }

    #[test]
    fn each_invariant_has_its_own_message() {
        let empty = Binding::new("empty", BindingElementCollection::new());
        assert!(invalid_message(&empty).contains("no transport"));

        let two = Binding::new(
            "two",
            elements(vec![
                Box::new(LoopbackTransportBindingElement::default()),
                Box::new(LoopbackTransportBindingElement::default()),
            ]),
        );
        assert!(invalid_message(&two).contains("2 transport binding elements"));

        let misplaced = Binding::new(
            "misplaced",
            elements(vec![
                Box::new(LoopbackTransportBindingElement::default()),
                Box::new(BinaryMessageEncodingBindingElement::default()),
            ]),
        );
        assert!(invalid_message(&misplaced).contains("must be the last element"));

        let mut transport = LoopbackTransportBindingElement::default();
        transport.set_scheme("");
        let unnamed = Binding::new("unnamed", elements(vec![Box::new(transport)]));
        assert!(invalid_message(&unnamed).contains("empty scheme"));

        let versionless = Binding::new(
            "versionless",
            elements(vec![Box::new(Inert { scheme: "x" })]),
        );
        assert!(invalid_message(&versionless).contains("message version"));
    }

    #[test]
    fn message_version_comes_from_the_encoder() {
        let mut encoding = BinaryMessageEncodingBindingElement::default();
        encoding
            .set_message_version(MessageVersion::Soap12WSAddressingAugust2004)
            .unwrap();
        let binding = Binding::new(
            "custom",
            elements(vec![
                Box::new(encoding),
                Box::new(LoopbackTransportBindingElement::default()),
            ]),
        );
        binding.ensure_invariants().unwrap();
        assert_eq!(
            binding.message_version(),
            Some(MessageVersion::Soap12WSAddressingAugust2004)
        );
        assert_eq!(binding.scheme(), Some("test"));
    }

    #[test]
    fn build_checks_invariants_first() {
        let binding = Binding::new("empty", BindingElementCollection::new());
        assert!(matches!(
            binding.build_channel_factory::<RequestChannelKind>(BindingParameterCollection::new()),
            Err(BindingError::InvalidBinding(_))
        ));
        assert!(!binding.can_build_channel_factory::<RequestChannelKind>(
            &BindingParameterCollection::new()
        ));
    }

    #[test]
    fn can_build_asks_the_stack() {
        let loopback = Binding::new(
            "loopback",
            elements(vec![Box::new(LoopbackTransportBindingElement::default())]),
        );
        let params = BindingParameterCollection::new();
        assert!(loopback.can_build_channel_factory::<RequestChannelKind>(&params));
        assert!(loopback.can_build_channel_factory::<OutputChannelKind>(&params));
        assert!(loopback.can_build_channel_factory::<InputChannelKind>(&params));

        let mut inert = loopback.clone();
        inert.elements_mut().remove(0);
        inert.elements_mut().push(Inert { scheme: "x" });
        assert!(!inert.can_build_channel_factory::<RequestChannelKind>(&params));
    }

    #[test]
    fn collection_clone_is_deep_and_searchable() {
        let mut collection = BindingElementCollection::new();
        collection.push(BinaryMessageEncodingBindingElement::default());
        collection.push(LoopbackTransportBindingElement::default());

        let mut copy = collection.clone();
        assert!(copy.remove(0).is_some());
        assert!(copy.remove(5).is_none());
        assert_eq!(collection.len(), 2);
        assert_eq!(copy.len(), 1);
        assert!(collection.find::<BinaryMessageEncodingBindingElement>().is_some());
        assert!(copy.find::<BinaryMessageEncodingBindingElement>().is_none());
        assert_eq!(copy.transport().map(|t| t.scheme()), Some("test"));
    }

    #[test]
    fn builds_are_repeatable() {
        let binding = Binding::new(
            "loopback",
            elements(vec![
                Box::new(BinaryMessageEncodingBindingElement::default()),
                Box::new(LoopbackTransportBindingElement::default()),
            ]),
        )
        .with_namespace("urn:chanprims:test");
        let first = binding
            .build_channel_factory::<RequestChannelKind>(BindingParameterCollection::new())
            .unwrap();
        let second = binding
            .build_channel_factory::<RequestChannelKind>(BindingParameterCollection::new())
            .unwrap();
        assert!(!Arc::ptr_eq(first.inner(), second.inner()));
        assert_eq!(first.inner().shape(), ChannelShape::Request);
        assert_eq!(binding.namespace(), "urn:chanprims:test");
    }
}
