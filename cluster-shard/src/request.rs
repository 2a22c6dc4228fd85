use crate::command::Command;
use crate::resolver;

/// One positional argument of a command.
///
/// Key arguments may be given as [`Arg::Tagged`] to route by an explicit tag
/// without embedding `{tag}` in the stored key name. Plain keys are always
/// sent to the backend byte-for-byte, braces included; only the braced
/// section feeds the hash.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Arg {
    Plain(Vec<u8>),
    Tagged { tag: Vec<u8>, value: Vec<u8> },
}

impl Arg {
    /// Pair form `(tag, key)`: `tag` picks the partition, `key` is what gets stored.
    pub fn tagged(tag: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) -> Self {
        Self::Tagged {
            tag: tag.into(),
            value: value.into(),
        }
    }

    /// Bytes sent to the backend.
    pub fn value(&self) -> &[u8] {
        match self {
            Self::Plain(value) | Self::Tagged { value, .. } => value,
        }
    }

    /// Explicit or embedded hash tag, if any.
    pub fn tag(&self) -> Option<&[u8]> {
        match self {
            Self::Plain(value) => resolver::hash_tag(value),
            Self::Tagged { tag, .. } => Some(tag),
        }
    }

    /// Bytes that decide the owning partition.
    pub fn hash_key(&self) -> &[u8] {
        match self {
            Self::Plain(value) => resolver::hash_key(value),
            Self::Tagged { tag, .. } => tag,
        }
    }

    pub fn into_value(self) -> Vec<u8> {
        match self {
            Self::Plain(value) | Self::Tagged { value, .. } => value,
        }
    }
}

impl From<Vec<u8>> for Arg {
    fn from(value: Vec<u8>) -> Self {
        Self::Plain(value)
    }
}

impl From<&[u8]> for Arg {
    fn from(value: &[u8]) -> Self {
        Self::Plain(value.to_vec())
    }
}

impl<const N: usize> From<&[u8; N]> for Arg {
    fn from(value: &[u8; N]) -> Self {
        Self::Plain(value.to_vec())
    }
}

impl From<&str> for Arg {
    fn from(value: &str) -> Self {
        Self::Plain(value.as_bytes().to_vec())
    }
}

impl From<String> for Arg {
    fn from(value: String) -> Self {
        Self::Plain(value.into_bytes())
    }
}

impl From<&String> for Arg {
    fn from(value: &String) -> Self {
        Self::Plain(value.as_bytes().to_vec())
    }
}

impl From<&Arg> for Arg {
    fn from(value: &Arg) -> Self {
        value.clone()
    }
}

macro_rules! numeric_arg {
    ($($ty:ty),+) => {
        $(
            impl From<$ty> for Arg {
                fn from(value: $ty) -> Self {
                    Self::Plain(value.to_string().into_bytes())
                }
            }
        )+
    };
}

numeric_arg!(i32, i64, u32, u64, usize, f64);

/// A command plus its positional arguments, not yet routed.
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    command: Command,
    args: Vec<Arg>,
}

impl Request {
    pub fn new(command: Command) -> Self {
        Self {
            command,
            args: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<Arg>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I>(mut self, args: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<Arg>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn command(&self) -> Command {
        self.command
    }

    pub fn arguments(&self) -> &[Arg] {
        &self.args
    }

    pub fn into_parts(self) -> (Command, Vec<Arg>) {
        (self.command, self.args)
    }
}
