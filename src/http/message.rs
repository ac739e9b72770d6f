use std::collections::HashMap;

/// Value of a cookie attribute.
///
/// `Path=/` carries a value, `HttpOnly` is a bare flag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CookieAttr {
    Value(String),
    Flag,
}

impl CookieAttr {
    /// Returns the attribute value, `None` for bare flags.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            CookieAttr::Value(v) => Some(v.as_str()),
            CookieAttr::Flag => None,
        }
    }

    pub fn is_flag(&self) -> bool {
        matches!(self, CookieAttr::Flag)
    }
}

impl From<&str> for CookieAttr {
    fn from(value: &str) -> Self {
        CookieAttr::Value(value.to_string())
    }
}

impl From<String> for CookieAttr {
    fn from(value: String) -> Self {
        CookieAttr::Value(value)
    }
}

impl From<bool> for CookieAttr {
    fn from(_: bool) -> Self {
        CookieAttr::Flag
    }
}

/// A cookie as seen in a `Set-Cookie` line or attached to a request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Cookie {
    /// Cookie value; `None` when the name/value segment had no `=`
    pub value: Option<String>,
    /// Attributes keyed by their name as written (e.g. `Path`, `HttpOnly`)
    pub attributes: HashMap<String, CookieAttr>,
}

impl Cookie {
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            value: Some(value.into()),
            attributes: HashMap::new(),
        }
    }

    pub fn attribute(&self, name: &str) -> Option<&CookieAttr> {
        self.attributes.get(name)
    }

    pub fn with_attribute(mut self, name: impl Into<String>, attr: impl Into<CookieAttr>) -> Self {
        self.attributes.insert(name.into(), attr.into());
        self
    }
}

/// Body, headers and cookies shared by requests and responses.
///
/// Header names are stored lower-cased, so every lookup is case-insensitive.
#[derive(Debug, Clone, Default)]
pub struct Message {
    raw_body: Option<Vec<u8>>,
    headers: HashMap<String, String>,
    cookies: HashMap<String, Cookie>,
}

impl Message {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn raw_body(&self) -> Option<&[u8]> {
        self.raw_body.as_deref()
    }

    pub fn set_raw_body(&mut self, body: impl Into<Vec<u8>>) -> &mut Self {
        self.raw_body = Some(body.into());
        self
    }

    pub fn clear_raw_body(&mut self) -> &mut Self {
        self.raw_body = None;
        self
    }

    /// Appends a streamed body chunk. The first chunk turns an absent body
    /// into a present one, even if it is empty.
    pub fn append_body(&mut self, chunk: &[u8]) {
        self.raw_body
            .get_or_insert_with(Vec::new)
            .extend_from_slice(chunk);
    }

    /// Retrieves a header value by name (case-insensitive).
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(|v| v.as_str())
    }

    pub fn headers(&self) -> &HashMap<String, String> {
        &self.headers
    }

    /// Adds or replaces a header.
    pub fn set_header(&mut self, field: &str, value: impl Into<String>) -> &mut Self {
        self.headers
            .insert(field.trim().to_ascii_lowercase(), value.into());
        self
    }

    pub fn remove_header(&mut self, field: &str) -> Option<String> {
        self.headers.remove(&field.to_ascii_lowercase())
    }

    /// Value of one cookie. `None` when the cookie is unknown or valueless.
    pub fn cookie(&self, name: &str) -> Option<&str> {
        self.cookies.get(name).and_then(|c| c.value.as_deref())
    }

    /// All cookies with their attributes.
    pub fn cookies(&self) -> &HashMap<String, Cookie> {
        &self.cookies
    }

    /// Attributes of one cookie; empty when the cookie is unknown.
    pub fn cookie_attributes(&self, name: &str) -> HashMap<String, CookieAttr> {
        self.cookies
            .get(name)
            .map(|c| c.attributes.clone())
            .unwrap_or_default()
    }

    /// Name to value map of every cookie that has a value.
    pub fn cookie_values(&self) -> HashMap<&str, &str> {
        self.cookies
            .iter()
            .filter_map(|(name, c)| c.value.as_deref().map(|v| (name.as_str(), v)))
            .collect()
    }

    pub fn set_cookie(&mut self, name: impl Into<String>, cookie: Cookie) -> &mut Self {
        self.cookies.insert(name.into(), cookie);
        self
    }

    /// Drops body, headers and cookies.
    pub fn reset(&mut self) {
        self.raw_body = None;
        self.headers.clear();
        self.cookies.clear();
    }
}
