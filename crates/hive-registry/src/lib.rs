use std::fmt;

use hive_protocol::{DecodeError, KernelError, KernelResult, LaunchRejection, WorldSnapshot};
use indexmap::IndexMap;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, error};

/// Rebuilds a node kind from its encoded fields, re-resolving embedded ids
/// against the current world.
pub type DecodeFn<N> =
    Box<dyn Fn(&Value, &WorldSnapshot) -> Result<N, DecodeError> + Send + Sync>;

/// Builds a fresh node kind from launch arguments.
pub type ConstructFn<N> = Box<dyn Fn(&Value) -> Result<N, String> + Send + Sync>;

struct Registration<N> {
    decode: DecodeFn<N>,
    construct: Option<ConstructFn<N>>,
}

/// Maps short type tags to decoders for one closed node kind `N`.
///
/// `N` is an enum owned by the caller; each decoder returns the matching
/// variant directly, so reconstruction never needs a downcast.
pub struct TypeRegistry<N> {
    entries: IndexMap<String, Registration<N>>,
}

impl<N> Default for TypeRegistry<N> {
    fn default() -> Self {
        Self {
            entries: IndexMap::new(),
        }
    }
}

impl<N> fmt::Debug for TypeRegistry<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypeRegistry")
            .field("tags", &self.entries.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl<N> TypeRegistry<N> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a decoder for `tag`. Registering a tag twice is a
    /// programming error and is reported here, not at decode time.
    pub fn register<D>(&mut self, tag: impl Into<String>, decode: D) -> KernelResult<()>
    where
        D: Fn(&Value, &WorldSnapshot) -> Result<N, DecodeError> + Send + Sync + 'static,
    {
        self.insert(tag.into(), Box::new(decode), None)
    }

    /// Register a kind that processes may also launch with arguments.
    pub fn register_launchable<D, C>(
        &mut self,
        tag: impl Into<String>,
        decode: D,
        construct: C,
    ) -> KernelResult<()>
    where
        D: Fn(&Value, &WorldSnapshot) -> Result<N, DecodeError> + Send + Sync + 'static,
        C: Fn(&Value) -> Result<N, String> + Send + Sync + 'static,
    {
        self.insert(tag.into(), Box::new(decode), Some(Box::new(construct)))
    }

    pub fn with<D>(mut self, tag: impl Into<String>, decode: D) -> KernelResult<Self>
    where
        D: Fn(&Value, &WorldSnapshot) -> Result<N, DecodeError> + Send + Sync + 'static,
    {
        self.register(tag, decode)?;
        Ok(self)
    }

    pub fn with_launchable<D, C>(
        mut self,
        tag: impl Into<String>,
        decode: D,
        construct: C,
    ) -> KernelResult<Self>
    where
        D: Fn(&Value, &WorldSnapshot) -> Result<N, DecodeError> + Send + Sync + 'static,
        C: Fn(&Value) -> Result<N, String> + Send + Sync + 'static,
    {
        self.register_launchable(tag, decode, construct)?;
        Ok(self)
    }

    fn insert(
        &mut self,
        tag: String,
        decode: DecodeFn<N>,
        construct: Option<ConstructFn<N>>,
    ) -> KernelResult<()> {
        if self.entries.contains_key(&tag) {
            error!(type_tag = %tag, "type tag registered twice");
            return Err(KernelError::DuplicateTag(tag));
        }
        debug!(type_tag = %tag, launchable = construct.is_some(), "type registered");
        self.entries.insert(tag, Registration { decode, construct });
        Ok(())
    }

    pub fn contains(&self, tag: &str) -> bool {
        self.entries.contains_key(tag)
    }

    pub fn is_launchable(&self, tag: &str) -> bool {
        self.entries
            .get(tag)
            .is_some_and(|entry| entry.construct.is_some())
    }

    /// Registered tags in registration order.
    pub fn tags(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Rebuild the node kind stored under `tag`. Logging is left to the
    /// caller, which knows the node's identity.
    pub fn decode(&self, tag: &str, fields: &Value, world: &WorldSnapshot) -> Result<N, DecodeError> {
        let entry = self
            .entries
            .get(tag)
            .ok_or_else(|| DecodeError::UnknownTag(tag.to_owned()))?;
        (entry.decode)(fields, world)
    }

    pub fn construct(&self, tag: &str, arguments: &Value) -> Result<N, LaunchRejection> {
        let entry = self
            .entries
            .get(tag)
            .ok_or_else(|| LaunchRejection::UnknownType(tag.to_owned()))?;
        let construct = entry
            .construct
            .as_ref()
            .ok_or_else(|| LaunchRejection::UnknownType(tag.to_owned()))?;
        construct(arguments).map_err(|reason| LaunchRejection::InvalidArguments {
            type_tag: tag.to_owned(),
            reason,
        })
    }
}

/// Deserialize a node's own fields, mapping failures to
/// [`DecodeError::Malformed`].
pub fn decode_fields<T: DeserializeOwned>(tag: &str, fields: &Value) -> Result<T, DecodeError> {
    T::deserialize(fields).map_err(|error| DecodeError::malformed(tag, error))
}
