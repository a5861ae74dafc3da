mod url;

pub use url::{Endpoint, UrlError};
