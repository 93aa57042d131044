//! HTTP request builders for testing handlers

use actix_web::cookie::Cookie;
use actix_web::http::header::AUTHORIZATION;
use actix_web::http::Method;
use actix_web::{test, HttpRequest};

use crate::session::cookie::ResponseCookies;

/// Builder for creating HTTP requests for testing
pub struct RequestBuilder {
    method: Method,
    uri: String,
    headers: Vec<(String, String)>,
    cookies: Vec<Cookie<'static>>,
}

impl Default for RequestBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl RequestBuilder {
    /// Create a new request builder
    #[must_use]
    pub fn new() -> Self {
        Self {
            method: Method::GET,
            uri: "/".to_string(),
            headers: Vec::new(),
            cookies: Vec::new(),
        }
    }

    /// Set the HTTP method
    #[must_use]
    pub fn method(mut self, method: Method) -> Self {
        self.method = method;
        self
    }

    /// Set the request URI
    #[must_use]
    pub fn uri(mut self, uri: &str) -> Self {
        self.uri = uri.to_string();
        self
    }

    /// Add a header
    #[must_use]
    pub fn header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    /// Set the `Authorization` header verbatim
    #[must_use]
    pub fn with_authorization(self, value: &str) -> Self {
        self.header(AUTHORIZATION.as_str(), value)
    }

    /// Add a cookie to the request
    #[must_use]
    pub fn with_cookie(mut self, cookie: Cookie<'static>) -> Self {
        self.cookies.push(cookie);
        self
    }

    /// Send back every live cookie a previous response set, as a browser would
    #[must_use]
    pub fn with_response_cookies(self, response: &ResponseCookies) -> Self {
        response
            .writes()
            .iter()
            .filter(|write| !write.is_deletion())
            .map(|write| Cookie::new(write.name.clone(), write.value.clone().unwrap_or_default()))
            .fold(self, Self::with_cookie)
    }

    /// Build a `TestRequest`, for driving a test service
    #[must_use]
    pub fn to_test_request(self) -> test::TestRequest {
        let mut req = test::TestRequest::default()
            .method(self.method)
            .uri(&self.uri);

        for (name, value) in self.headers {
            req = req.insert_header((name, value));
        }

        for cookie in self.cookies {
            req = req.cookie(cookie);
        }

        req
    }

    /// Build the final `HttpRequest`
    #[must_use]
    pub fn build(self) -> HttpRequest {
        self.to_test_request().to_http_request()
    }
}

/// Quick builder functions for common request types
impl RequestBuilder {
    /// POST to `uri` with an `Authorization` header
    #[must_use]
    pub fn login(uri: &str, token: &str) -> test::TestRequest {
        Self::new()
            .method(Method::POST)
            .uri(uri)
            .with_authorization(token)
            .to_test_request()
    }

    /// GET `uri` carrying the cookies of a previous response
    #[must_use]
    pub fn with_session(uri: &str, response: &ResponseCookies) -> test::TestRequest {
        Self::new()
            .uri(uri)
            .with_response_cookies(response)
            .to_test_request()
    }
}
