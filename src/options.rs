//! Typed configuration options.
//!
//! An [`OptionKey`] is a typed key with a textual name and a parser from
//! string form. An [`OptionMap`] is an immutable mapping from keys to typed
//! values; it is cheap to clone and share, and new maps are derived through a
//! copy-on-write [`OptionMapBuilder`].
//!
//! Textual form is `name=value` for scalars and `name=v1,v2,v3` for
//! sequence-valued options. Unknown names fail with *unsupported-option*.
//!
//! ```
//! use evio::options::{self, OptionMap};
//!
//! let map = OptionMap::builder()
//!     .set(&options::TCP_NODELAY, true)
//!     .parse("max-inbound-message-size=65536")
//!     .unwrap()
//!     .build();
//! assert_eq!(map.get(&options::MAX_INBOUND_MESSAGE_SIZE), Some(65536));
//! assert_eq!(map.get_or(&options::KEEP_ALIVE, false), false);
//! ```

use crate::error::{Error, ErrorKind};
use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::marker::PhantomData;
use std::str::FromStr;
use std::sync::Arc;
use thiserror::Error as ThisError;

/// Error produced when parsing an option from its textual form.
#[derive(Debug, Clone, ThisError)]
pub enum OptionParseError {
    /// The option name is not in the registry.
    #[error("unknown option {name:?}")]
    UnknownOption {
        /// The offending name.
        name: String,
    },
    /// The input was not of the form `name=value`.
    #[error("malformed option assignment {input:?}")]
    Syntax {
        /// The full input.
        input: String,
    },
    /// The value could not be parsed for the named option.
    #[error("invalid value {value:?} for option {name}")]
    Value {
        /// The option name.
        name: &'static str,
        /// The offending value text.
        value: String,
    },
}

impl From<OptionParseError> for Error {
    fn from(err: OptionParseError) -> Self {
        Error::with_context(ErrorKind::UnsupportedOption, err.to_string()).with_source(err)
    }
}

/// An immutable, shared, ordered sequence value.
#[derive(Clone, PartialEq, Eq)]
pub struct Sequence<T>(Arc<[T]>);

impl<T> Sequence<T> {
    /// Creates a sequence from a vector.
    #[must_use]
    pub fn new(items: Vec<T>) -> Self {
        Self(items.into())
    }

    /// Returns the items as a slice.
    #[must_use]
    pub fn as_slice(&self) -> &[T] {
        &self.0
    }

    /// Returns the number of items.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns true when the sequence is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterates over the items.
    pub fn iter(&self) -> std::slice::Iter<'_, T> {
        self.0.iter()
    }
}

impl<T> std::ops::Deref for Sequence<T> {
    type Target = [T];

    fn deref(&self) -> &[T] {
        &self.0
    }
}

impl<T> FromIterator<T> for Sequence<T> {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl<'a, T> IntoIterator for &'a Sequence<T> {
    type Item = &'a T;
    type IntoIter = std::slice::Iter<'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

impl<T: fmt::Debug> fmt::Debug for Sequence<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.0.iter()).finish()
    }
}

/// TLS client-certificate authentication mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SslClientAuthMode {
    /// The server does not ask for a client certificate.
    NotRequested,
    /// The server asks for a client certificate but accepts its absence.
    Requested,
    /// The server requires a client certificate.
    Required,
}

impl FromStr for SslClientAuthMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.replace('_', "-").to_ascii_lowercase().as_str() {
            "not-requested" => Ok(Self::NotRequested),
            "requested" => Ok(Self::Requested),
            "required" => Ok(Self::Required),
            other => Err(format!("unknown client auth mode {other:?}")),
        }
    }
}

type StoredValue = Arc<dyn Any + Send + Sync>;
type ParseFn = fn(&'static str, &str) -> std::result::Result<StoredValue, OptionParseError>;

/// A typed option key.
///
/// Keys are declared as statics (see the constants in this module); identity
/// is by name.
pub struct OptionKey<T: 'static> {
    name: &'static str,
    parse: ParseFn,
    _marker: PhantomData<fn() -> T>,
}

impl<T> OptionKey<T> {
    /// Returns the textual name of this option.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        self.name
    }
}

impl<T> fmt::Debug for OptionKey<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("OptionKey").field(&self.name).finish()
    }
}

fn parse_scalar<T>(name: &'static str, value: &str) -> std::result::Result<StoredValue, OptionParseError>
where
    T: FromStr + Send + Sync + 'static,
{
    value
        .trim()
        .parse::<T>()
        .map(|v| Arc::new(v) as StoredValue)
        .map_err(|_| OptionParseError::Value {
            name,
            value: value.to_string(),
        })
}

fn parse_string_sequence(
    _name: &'static str,
    value: &str,
) -> std::result::Result<StoredValue, OptionParseError> {
    let items: Sequence<String> = value
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect();
    Ok(Arc::new(items))
}

macro_rules! option_keys {
    ($($(#[$doc:meta])* $ident:ident : $ty:ty = ($name:literal, $parse:expr);)*) => {
        $(
            $(#[$doc])*
            pub static $ident: OptionKey<$ty> = OptionKey {
                name: $name,
                parse: $parse,
                _marker: PhantomData,
            };
        )*

        /// Every registered option, for textual parsing.
        static REGISTRY: &[(&str, ParseFn)] = &[
            $(($name, $parse),)*
        ];
    };
}

option_keys! {
    /// Maximum size of an inbound framed message, in bytes.
    MAX_INBOUND_MESSAGE_SIZE: usize = ("max-inbound-message-size", parse_scalar::<usize>);
    /// Maximum size of an outbound framed message, in bytes.
    MAX_OUTBOUND_MESSAGE_SIZE: usize = ("max-outbound-message-size", parse_scalar::<usize>);
    /// TLS client-certificate authentication mode (server side).
    SSL_CLIENT_AUTH_MODE: SslClientAuthMode =
        ("ssl-client-auth-mode", parse_scalar::<SslClientAuthMode>);
    /// Whether the TLS engine runs in client mode.
    SSL_USE_CLIENT_MODE: bool = ("ssl-use-client-mode", parse_scalar::<bool>);
    /// Whether the TLS engine may create new sessions.
    SSL_ENABLE_SESSION_CREATION: bool =
        ("ssl-enable-session-creation", parse_scalar::<bool>);
    /// Cipher suites to enable, intersected with the engine's supported set.
    SSL_ENABLED_CIPHER_SUITES: Sequence<String> =
        ("ssl-enabled-cipher-suites", parse_string_sequence);
    /// Protocol versions to enable, intersected with the engine's supported set.
    SSL_ENABLED_PROTOCOLS: Sequence<String> =
        ("ssl-enabled-protocols", parse_string_sequence);
    /// Socket keep-alive.
    KEEP_ALIVE: bool = ("keep-alive", parse_scalar::<bool>);
    /// Disable Nagle's algorithm.
    TCP_NODELAY: bool = ("tcp-nodelay", parse_scalar::<bool>);
    /// Allow local address reuse.
    REUSE_ADDRESS: bool = ("reuse-address", parse_scalar::<bool>);
    /// Allow datagram broadcast.
    BROADCAST: bool = ("broadcast", parse_scalar::<bool>);
    /// Linger-on-close, in seconds; negative disables lingering.
    LINGER: i32 = ("linger", parse_scalar::<i32>);
    /// Socket receive buffer size, in bytes. Also bounds the pipe channel
    /// queue capacity.
    RECEIVE_BUFFER: usize = ("receive-buffer", parse_scalar::<usize>);
    /// Socket send buffer size, in bytes.
    SEND_BUFFER: usize = ("send-buffer", parse_scalar::<usize>);
    /// Multicast time-to-live.
    MULTICAST_TTL: u32 = ("multicast-ttl", parse_scalar::<u32>);
    /// Accept backlog for channel destinations.
    BACKLOG: u32 = ("backlog", parse_scalar::<u32>);
}

/// An immutable map from option keys to typed values.
///
/// Cloning is cheap; the contents are shared. New maps are built with
/// [`OptionMap::builder`] or derived with [`OptionMap::to_builder`].
#[derive(Clone, Default)]
pub struct OptionMap {
    entries: Arc<HashMap<&'static str, StoredValue>>,
}

impl OptionMap {
    /// The empty option map.
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Starts building a new map from scratch.
    #[must_use]
    pub fn builder() -> OptionMapBuilder {
        OptionMapBuilder {
            entries: HashMap::new(),
        }
    }

    /// Starts building a new map seeded with this map's contents.
    ///
    /// The source map is never mutated; the builder copies on write.
    #[must_use]
    pub fn to_builder(&self) -> OptionMapBuilder {
        OptionMapBuilder {
            entries: (*self.entries).clone(),
        }
    }

    /// Returns the typed value for `key`, if present.
    #[must_use]
    pub fn get<T>(&self, key: &OptionKey<T>) -> Option<T>
    where
        T: Clone + Send + Sync + 'static,
    {
        self.entries
            .get(key.name)
            .and_then(|v| v.downcast_ref::<T>())
            .cloned()
    }

    /// Returns the typed value for `key`, or `default` when absent.
    #[must_use]
    pub fn get_or<T>(&self, key: &OptionKey<T>, default: T) -> T
    where
        T: Clone + Send + Sync + 'static,
    {
        self.get(key).unwrap_or(default)
    }

    /// Returns true when a value is present for `key`.
    #[must_use]
    pub fn contains<T>(&self, key: &OptionKey<T>) -> bool {
        self.entries.contains_key(key.name)
    }

    /// Returns the number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true when the map has no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl fmt::Debug for OptionMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.entries.keys()).finish()
    }
}

/// Builder for [`OptionMap`].
#[derive(Default)]
pub struct OptionMapBuilder {
    entries: HashMap<&'static str, StoredValue>,
}

impl std::fmt::Debug for OptionMapBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OptionMapBuilder")
            .field("entries", &self.entries.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl OptionMapBuilder {
    /// Sets or replaces the value for `key`.
    #[must_use]
    pub fn set<T>(mut self, key: &OptionKey<T>, value: T) -> Self
    where
        T: Send + Sync + 'static,
    {
        self.entries.insert(key.name, Arc::new(value));
        self
    }

    /// Removes the value for `key`.
    #[must_use]
    pub fn unset<T>(mut self, key: &OptionKey<T>) -> Self {
        self.entries.remove(key.name);
        self
    }

    /// Parses a single `name=value` (or `name=v1,v2,…`) assignment.
    ///
    /// # Errors
    ///
    /// Fails with [`OptionParseError::UnknownOption`] for names not in the
    /// registry, [`OptionParseError::Syntax`] when no `=` is present, and
    /// [`OptionParseError::Value`] when the value text does not parse.
    pub fn parse(mut self, text: &str) -> std::result::Result<Self, OptionParseError> {
        let (name, value) = text.split_once('=').ok_or_else(|| OptionParseError::Syntax {
            input: text.to_string(),
        })?;
        let name = name.trim();
        let (registered, parse) = REGISTRY
            .iter()
            .find(|(n, _)| *n == name)
            .copied()
            .ok_or_else(|| OptionParseError::UnknownOption {
                name: name.to_string(),
            })?;
        let value = parse(registered, value)?;
        self.entries.insert(registered, value);
        Ok(self)
    }

    /// Parses a whole sequence of assignments, applying each in order.
    ///
    /// # Errors
    ///
    /// Fails on the first assignment that does not parse.
    pub fn parse_all<'a>(
        mut self,
        assignments: impl IntoIterator<Item = &'a str>,
    ) -> std::result::Result<Self, OptionParseError> {
        for text in assignments {
            self = self.parse(text)?;
        }
        Ok(self)
    }

    /// Finishes the build.
    #[must_use]
    pub fn build(self) -> OptionMap {
        OptionMap {
            entries: Arc::new(self.entries),
        }
    }
}
