use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use bytes::Bytes;
use serde::Serialize;
use url::form_urlencoded;
use uuid::Uuid;

use crate::call::Call;
use crate::error::{Error, Result};
use crate::http::message::{Cookie, Message};

/// HTTP request methods.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    /// GET - Retrieve a resource
    GET,
    /// POST - Create or submit data
    POST,
    /// PUT - Replace a resource
    PUT,
    /// DELETE - Delete a resource
    DELETE,
    /// HEAD - Like GET but without the response body
    HEAD,
    /// OPTIONS - Describe communication options
    OPTIONS,
    /// PATCH - Partial modification of a resource
    PATCH,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::GET => "GET",
            Method::POST => "POST",
            Method::PUT => "PUT",
            Method::DELETE => "DELETE",
            Method::HEAD => "HEAD",
            Method::OPTIONS => "OPTIONS",
            Method::PATCH => "PATCH",
        }
    }

    /// Whether post params, files and raw bodies are sent for this verb.
    pub fn carries_body(&self) -> bool {
        matches!(self, Method::POST | Method::PUT | Method::PATCH)
    }
}

impl FromStr for Method {
    type Err = Error;

    /// Parses a verb, ignoring case.
    ///
    /// ```
    /// # use httpcall::http::request::Method;
    /// assert_eq!("get".parse::<Method>().unwrap(), Method::GET);
    /// assert!("FETCH".parse::<Method>().is_err());
    /// ```
    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_uppercase().as_str() {
            "GET" => Ok(Method::GET),
            "POST" => Ok(Method::POST),
            "PUT" => Ok(Method::PUT),
            "DELETE" => Ok(Method::DELETE),
            "HEAD" => Ok(Method::HEAD),
            "OPTIONS" => Ok(Method::OPTIONS),
            "PATCH" => Ok(Method::PATCH),
            _ => Err(Error::InvalidMethod(s.to_string())),
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Request body ready to be put on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompiledBody {
    pub content_type: Option<String>,
    pub bytes: Bytes,
}

/// An outgoing HTTP request.
///
/// Params, files and user fields are kept in ordered maps so compiled query
/// strings and bodies are deterministic.
#[derive(Debug, Clone)]
pub struct RequestMessage {
    message: Message,
    method: Method,
    uri: String,
    get_params: BTreeMap<String, String>,
    post_params: BTreeMap<String, String>,
    files: BTreeMap<String, PathBuf>,
    user_fields: BTreeMap<String, serde_json::Value>,
}

impl RequestMessage {
    pub fn new(method: Method, uri: impl Into<String>) -> Self {
        Self {
            message: Message::new(),
            method,
            uri: uri.into(),
            get_params: BTreeMap::new(),
            post_params: BTreeMap::new(),
            files: BTreeMap::new(),
            user_fields: BTreeMap::new(),
        }
    }

    /// Builds a request from a verb string such as `"get"` or `"POST"`.
    pub fn create(verb: &str, uri: impl Into<String>) -> Result<Self> {
        Ok(Self::new(verb.parse()?, uri))
    }

    pub fn method(&self) -> Method {
        self.method
    }

    pub fn set_method(&mut self, method: Method) -> &mut Self {
        self.method = method;
        self
    }

    pub fn uri(&self) -> &str {
        &self.uri
    }

    pub fn set_uri(&mut self, uri: impl Into<String>) -> &mut Self {
        self.uri = uri.into();
        self
    }

    pub fn message(&self) -> &Message {
        &self.message
    }

    pub fn message_mut(&mut self) -> &mut Message {
        &mut self.message
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.message.header(name)
    }

    pub fn set_header(&mut self, field: &str, value: impl Into<String>) -> &mut Self {
        self.message.set_header(field, value);
        self
    }

    pub fn set_cookie(&mut self, name: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.message.set_cookie(name, Cookie::new(value));
        self
    }

    pub fn raw_body(&self) -> Option<&[u8]> {
        self.message.raw_body()
    }

    pub fn set_raw_body(&mut self, body: impl Into<Vec<u8>>) -> &mut Self {
        self.message.set_raw_body(body);
        self
    }

    /// Serializes `data` as the request body and marks it as JSON.
    pub fn set_json_body<T: Serialize + ?Sized>(&mut self, data: &T) -> Result<&mut Self> {
        let body = serde_json::to_vec(data)?;
        self.message.set_raw_body(body);
        self.message.set_header("Content-Type", "application/json");
        Ok(self)
    }

    /// Sets a GET parameter; `None` removes it.
    pub fn set_get_param(&mut self, field: impl Into<String>, value: Option<String>) -> &mut Self {
        set_or_remove(&mut self.get_params, field.into(), value);
        self
    }

    pub fn set_get_params<I, K, V>(&mut self, params: I) -> &mut Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        for (k, v) in params {
            self.get_params.insert(k.into(), v.into());
        }
        self
    }

    pub fn get_param(&self, field: &str) -> Option<&str> {
        self.get_params.get(field).map(|v| v.as_str())
    }

    pub fn get_params(&self) -> &BTreeMap<String, String> {
        &self.get_params
    }

    /// Sets a POST parameter; `None` removes it.
    pub fn set_post_param(&mut self, field: impl Into<String>, value: Option<String>) -> &mut Self {
        set_or_remove(&mut self.post_params, field.into(), value);
        self
    }

    pub fn set_post_params<I, K, V>(&mut self, params: I) -> &mut Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        for (k, v) in params {
            self.post_params.insert(k.into(), v.into());
        }
        self
    }

    pub fn post_param(&self, field: &str) -> Option<&str> {
        self.post_params.get(field).map(|v| v.as_str())
    }

    pub fn post_params(&self) -> &BTreeMap<String, String> {
        &self.post_params
    }

    /// Queues a file for upload as `field`; `None` removes it.
    pub fn set_file(&mut self, field: impl Into<String>, path: Option<PathBuf>) -> &mut Self {
        set_or_remove(&mut self.files, field.into(), path);
        self
    }

    pub fn set_files<I, K, P>(&mut self, files: I) -> &mut Self
    where
        I: IntoIterator<Item = (K, P)>,
        K: Into<String>,
        P: Into<PathBuf>,
    {
        for (k, p) in files {
            self.files.insert(k.into(), p.into());
        }
        self
    }

    pub fn file(&self, field: &str) -> Option<&Path> {
        self.files.get(field).map(|p| p.as_path())
    }

    pub fn files(&self) -> &BTreeMap<String, PathBuf> {
        &self.files
    }

    /// Caller bookkeeping; never sent. `None` removes the field.
    pub fn set_user_field(
        &mut self,
        field: impl Into<String>,
        value: Option<serde_json::Value>,
    ) -> &mut Self {
        set_or_remove(&mut self.user_fields, field.into(), value);
        self
    }

    pub fn set_user_fields<I, K>(&mut self, fields: I) -> &mut Self
    where
        I: IntoIterator<Item = (K, serde_json::Value)>,
        K: Into<String>,
    {
        for (k, v) in fields {
            self.user_fields.insert(k.into(), v);
        }
        self
    }

    pub fn user_field(&self, field: &str) -> Option<&serde_json::Value> {
        self.user_fields.get(field)
    }

    pub fn user_fields(&self) -> &BTreeMap<String, serde_json::Value> {
        &self.user_fields
    }

    /// Final URL with GET parameters appended.
    pub fn compile_url(&self) -> String {
        if self.get_params.is_empty() {
            return self.uri.clone();
        }

        let query = form_urlencoded::Serializer::new(String::new())
            .extend_pairs(self.get_params.iter())
            .finish();
        let separator = if self.uri.contains('?') { '&' } else { '?' };

        format!("{}{}{}", self.uri, separator, query)
    }

    /// Header lines to send, including one `Cookie` line for all cookies.
    pub fn compile_header_lines(&self) -> Vec<(String, String)> {
        let mut lines: Vec<(String, String)> = self
            .message
            .headers()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        lines.sort();

        let mut cookies: Vec<(&str, &str)> = self.message.cookie_values().into_iter().collect();
        if !cookies.is_empty() {
            cookies.sort();
            // An explicit `Cookie` header is merged in front so only one line is sent.
            let mut pairs: Vec<String> = Vec::with_capacity(cookies.len() + 1);
            if let Some(i) = lines.iter().position(|(k, _)| k == "cookie") {
                let (_, explicit) = lines.remove(i);
                let explicit = explicit.trim().trim_end_matches(';').trim_end();
                if !explicit.is_empty() {
                    pairs.push(explicit.to_string());
                }
            }
            pairs.extend(
                cookies
                    .iter()
                    .map(|(name, value)| format!("{}={}", name, value)),
            );
            lines.push(("cookie".to_string(), pairs.join("; ")));
        }

        lines
    }

    /// Body to send, `None` for verbs that carry no body or when there is
    /// nothing to send.
    ///
    /// A raw body wins over params. Without files the params are
    /// form-urlencoded; with files a multipart body is assembled, reading
    /// each file from disk.
    pub fn compile_body(&self) -> Result<Option<CompiledBody>> {
        if !self.method.carries_body() {
            return Ok(None);
        }

        if let Some(raw) = self.message.raw_body().filter(|b| !b.is_empty()) {
            return Ok(Some(CompiledBody {
                content_type: None,
                bytes: Bytes::copy_from_slice(raw),
            }));
        }

        if self.files.is_empty() {
            let encoded = form_urlencoded::Serializer::new(String::new())
                .extend_pairs(self.post_params.iter())
                .finish();
            return Ok(Some(CompiledBody {
                content_type: Some("application/x-www-form-urlencoded".to_string()),
                bytes: Bytes::from(encoded),
            }));
        }

        let mut uploads = Vec::with_capacity(self.files.len());
        for (field, path) in &self.files {
            let contents = std::fs::read(path)?;
            let filename = path
                .file_name()
                .map(|f| f.to_string_lossy().into_owned())
                .unwrap_or_default();
            uploads.push((field, filename, contents));
        }

        let parts = self
            .post_params
            .values()
            .map(|v| v.as_bytes())
            .chain(uploads.iter().map(|(_, _, contents)| contents.as_slice()));
        let boundary = multipart_boundary(parts, || {
            format!("----httpcall{}", Uuid::new_v4().simple())
        });
        let mut body = Vec::new();

        for (field, value) in &self.post_params {
            body.extend_from_slice(format!("--{}\r\n", boundary).as_bytes());
            body.extend_from_slice(
                format!("Content-Disposition: form-data; name=\"{}\"\r\n\r\n", field).as_bytes(),
            );
            body.extend_from_slice(value.as_bytes());
            body.extend_from_slice(b"\r\n");
        }

        for (field, filename, contents) in &uploads {
            body.extend_from_slice(format!("--{}\r\n", boundary).as_bytes());
            body.extend_from_slice(
                format!(
                    "Content-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\n",
                    field, filename
                )
                .as_bytes(),
            );
            body.extend_from_slice(b"Content-Type: application/octet-stream\r\n\r\n");
            body.extend_from_slice(contents);
            body.extend_from_slice(b"\r\n");
        }

        body.extend_from_slice(format!("--{}--\r\n", boundary).as_bytes());

        Ok(Some(CompiledBody {
            content_type: Some(format!("multipart/form-data; boundary={}", boundary)),
            bytes: Bytes::from(body),
        }))
    }

    /// Wraps the request into a call on the default TCP engine.
    pub fn into_call(self) -> Call {
        Call::new(self)
    }
}

fn set_or_remove<V>(map: &mut BTreeMap<String, V>, key: String, value: Option<V>) {
    match value {
        Some(v) => {
            map.insert(key, v);
        }
        None => {
            map.remove(&key);
        }
    }
}

/// Draws boundaries from `generate` until one occurs in none of `parts`.
fn multipart_boundary<'a>(
    parts: impl Iterator<Item = &'a [u8]> + Clone,
    mut generate: impl FnMut() -> String,
) -> String {
    loop {
        let boundary = generate();
        let needle = boundary.as_bytes();
        let collides = parts
            .clone()
            .any(|part| part.windows(needle.len()).any(|w| w == needle));
        if !collides {
            return boundary;
        }
    }
}
