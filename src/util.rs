use once_cell::sync::Lazy;
use regex::Regex;

mod byte_stream;
mod range;

pub use byte_stream::ByteStream;
pub use range::ByteRange;

// used to remove cred info from proxy url before printing
static AUTH_REGEX: Lazy<Regex> =
  Lazy::new(|| Regex::new(r"//[^:/@]+(:[^@]+)?@").unwrap());

pub fn redact_credentials(url: &str) -> String {
  AUTH_REGEX.replace(url, "//<REDACTED>@").into_owned()
}
