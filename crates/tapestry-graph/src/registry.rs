use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;
use log::debug;
use tapestry_core::{Error, Result};

use crate::operation::{Operation, Parameters};
use crate::ops;

/// Builds an operation from a parameter map.
pub trait OperationFactory: Send + Sync {
    fn create(&self, params: &Parameters) -> Result<Arc<dyn Operation>>;
}

impl<F> OperationFactory for F
where
    F: Fn(&Parameters) -> Result<Arc<dyn Operation>> + Send + Sync,
{
    fn create(&self, params: &Parameters) -> Result<Arc<dyn Operation>> {
        self(params)
    }
}

/// Name → factory lookup. Names keep their registration order.
#[derive(Default)]
pub struct OperationRegistry {
    factories: IndexMap<String, Arc<dyn OperationFactory>>,
}

impl fmt::Debug for OperationRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OperationRegistry")
            .field("names", &self.factories.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl OperationRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry holding every built-in operation under its own name.
    ///
    /// Each entry clones a default instance with the supplied parameters, so
    /// `create_operation("sum", &params)` goes through the same parameter
    /// parsing as `ops::sum(..).with_parameters(params)`.
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        let prototypes: Vec<Arc<dyn Operation>> = vec![
            ops::input(),
            ops::output(),
            ops::add(),
            ops::subtract(),
            ops::multiply(),
            ops::divide(),
            ops::matmul(),
            ops::relu(),
            ops::sigmoid(),
            ops::tanh(),
            ops::sqrt(),
            ops::softmax(None),
            ops::reshape(()),
            ops::transpose(0, 1),
            ops::sum(&[], false),
            ops::mean(&[], false),
            ops::conv2d(1, 0),
        ];
        for proto in prototypes {
            let name = proto.name().to_string();
            registry.register(name, move |params: &Parameters| {
                proto.with_parameters(params.clone())
            });
        }
        registry
    }

    /// Register (or replace) the factory for `name`.
    pub fn register(&mut self, name: impl Into<String>, factory: impl OperationFactory + 'static) {
        let name = name.into();
        debug!("registering operation `{name}`");
        self.factories.insert(name, Arc::new(factory));
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.factories.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.factories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.factories.is_empty()
    }

    /// Instantiate `name` with `params`.
    pub fn create_operation(&self, name: &str, params: &Parameters) -> Result<Arc<dyn Operation>> {
        let factory = self
            .factories
            .get(name)
            .ok_or_else(|| Error::UnknownOperation(name.to_string()))?;
        factory.create(params)
    }
}
