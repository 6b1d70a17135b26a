use std::{fmt, io};
use std::panic::Location;
use std::convert::Infallible;
use std::error::Error as StdError;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// A build error: one or more details, each with key/value context, and an
/// optional cause that is rendered nested beneath them.
#[derive(Debug)]
pub struct Error {
    details: Vec<Box<dyn ErrorDetail>>,
    cause: Option<Box<Error>>,
    location: &'static Location<'static>,
}

pub trait ErrorDetail: fmt::Display + fmt::Debug + Send + Sync {
    fn context(&self) -> Vec<(Option<String>, String)> { vec![] }
}

impl Error {
    #[track_caller]
    pub fn from_std<E>(error: E) -> Self
        where E: StdError + Send + Sync + 'static
    {
        Error::from(Box::new(error) as Box<dyn StdError + Send + Sync>)
    }

    /// Collects many independent failures into one error. Returns `None` if
    /// `details` is empty.
    #[track_caller]
    pub fn collect<I, D>(details: I) -> Option<Self>
        where I: IntoIterator<Item = D>, D: ErrorDetail + 'static
    {
        let details: Vec<Box<dyn ErrorDetail>> = details.into_iter()
            .map(|d| Box::new(d) as Box<dyn ErrorDetail>)
            .collect();

        if details.is_empty() {
            return None;
        }

        Some(Error { details, cause: None, location: Location::caller() })
    }

    /// Makes `self` the innermost cause of `outer` and returns `outer`.
    pub fn chain(self, mut outer: Error) -> Self {
        fn innermost(error: &mut Error) -> &mut Option<Box<Error>> {
            match error.cause {
                Some(ref mut cause) => innermost(cause),
                None => &mut error.cause,
            }
        }

        *innermost(&mut outer) = Some(Box::new(self));
        outer
    }

    pub fn len(&self) -> usize {
        self.details.len()
    }

    pub fn is_empty(&self) -> bool {
        self.details.is_empty()
    }

    fn write_nested(&self, f: &mut fmt::Formatter<'_>, depth: usize) -> fmt::Result {
        let indent = "    ".repeat(depth);
        let newline = format!("\n{indent}");
        for detail in &self.details {
            writeln!(f, "{indent}{}", detail.to_string().replace('\n', &newline))?;
            for (key, value) in detail.context() {
                let value = value.replace('\n', &newline);
                match key {
                    Some(key) => writeln!(f, "{indent}  {key}: {value}")?,
                    None => writeln!(f, "{indent}  {value}")?,
                }
            }
        }

        if std::env::var_os("RUST_BACKTRACE").is_some() {
            writeln!(f, "{indent}[{}]", self.location)?;
        }

        match &self.cause {
            Some(cause) => cause.write_nested(f, depth + 1),
            None => Ok(()),
        }
    }
}

impl<T: ErrorDetail + 'static> From<T> for Error {
    #[track_caller]
    fn from(detail: T) -> Self {
        Error {
            details: vec![Box::new(detail)],
            cause: None,
            location: Location::caller(),
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.write_nested(f, 0)
    }
}

impl ErrorDetail for &(dyn StdError + Send + Sync) {
    fn context(&self) -> Vec<(Option<String>, String)> {
        let mut context = vec![];
        let mut source = self.source();
        while let Some(e) = source {
            context.push((None, e.to_string()));
            source = e.source();
        }

        context
    }
}

impl ErrorDetail for Box<dyn StdError + Send + Sync> {
    fn context(&self) -> Vec<(Option<String>, String)> {
        let error: &(dyn StdError + Send + Sync) = &**self;
        error.context()
    }
}

macro_rules! impl_error_detail_with_std_error {
    ($($T:ty),+ $(,)?) => {
        $(
            impl $crate::error::ErrorDetail for $T {
                fn context(&self) -> Vec<(Option<String>, String)> {
                    let error: &(dyn std::error::Error + Send + Sync) = self;
                    $crate::error::ErrorDetail::context(&error)
                }
            }
        )+
    }
}

impl_error_detail_with_std_error! {
    io::Error,
    toml::de::Error,
    serde_json::Error,
    serde_yaml::Error,
    url::ParseError,
    reqwest::Error,
    tokio::task::JoinError,
}

impl ErrorDetail for String { }
impl ErrorDetail for &str { }

impl ErrorDetail for Infallible { }

/// A message plus ad-hoc context, as produced by [`error!`] and [`err!`].
#[derive(Debug)]
pub struct Detail {
    pub message: String,
    pub context: Vec<(Option<String>, String)>,
}

impl Detail {
    pub fn new<M: fmt::Display>(message: M) -> Self {
        Detail { message: message.to_string(), context: vec![] }
    }

    pub fn push(&mut self, key: Option<String>, value: String) {
        self.context.push((key, value));
    }
}

impl fmt::Display for Detail {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.message.fmt(f)
    }
}

impl ErrorDetail for Detail {
    fn context(&self) -> Vec<(Option<String>, String)> {
        self.context.clone()
    }
}

#[doc(hidden)]
#[macro_export]
macro_rules! err {
    ($($token:tt)*) => (Err($crate::error!($($token)*)));
}

#[doc(hidden)]
#[macro_export]
macro_rules! error {
    ($msg:expr $(,)?) => (
        $crate::error::Error::from($crate::error::Detail::new($msg))
    );

    ($msg:expr, $($rest:tt)+) => ({
        #[allow(unused_mut)]
        let mut detail = $crate::error::Detail::new($msg);
        $crate::error!(@param detail $($rest)+);
        $crate::error::Error::from(detail)
    });

    (@param $d:ident $key:expr => $value:expr $(, $($rest:tt)*)?) => {
        $d.push(Some($key.to_string()), $value.to_string());
        $($crate::error!(@param $d $($rest)*);)?
    };

    (@param $d:ident $value:expr $(, $($rest:tt)*)?) => {
        $d.push(None, $value.to_string());
        $($crate::error!(@param $d $($rest)*);)?
    };

    (@param $d:ident) => { };
}

pub trait Chainable<T> {
    fn chain(self, other: impl Into<Error>) -> Result<T>;

    fn chain_with<F, E>(self, f: F) -> Result<T>
        where F: FnOnce() -> E, E: Into<Error>;
}

impl<T, E: Into<Error>> Chainable<T> for Result<T, E> {
    #[track_caller]
    fn chain(self, other: impl Into<Error>) -> Result<T> {
        self.map_err(|e| e.into().chain(other.into()))
    }

    #[track_caller]
    fn chain_with<F, Err>(self, f: F) -> Result<T>
        where F: FnOnce() -> Err, Err: Into<Error>,
    {
        self.map_err(|e| e.into().chain(f().into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    static_assertions::assert_impl_all!(Error: Send, Sync);

    #[test]
    fn chained_errors_nest_causes() {
        let inner: Result<()> = err!("file missing", "path" => "a/b.jpg");
        let error = inner.chain(error!("recipe failed", "recipe" => "pie")).unwrap_err();
        let rendered = error.to_string();

        let outer_at = rendered.find("recipe failed").unwrap();
        let inner_at = rendered.find("    file missing").unwrap();
        assert!(outer_at < inner_at);
        assert!(rendered.contains("recipe: pie"));
        assert!(rendered.contains("path: a/b.jpg"));
    }

    #[test]
    fn collect_keeps_every_detail() {
        assert!(Error::collect(Vec::<String>::new()).is_none());

        let error = Error::collect(vec!["one".to_string(), "two".to_string()]).unwrap();
        assert_eq!(error.len(), 2);
        let rendered = error.to_string();
        assert!(rendered.contains("one") && rendered.contains("two"));
    }
}
