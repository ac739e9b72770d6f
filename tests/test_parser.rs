use httpcall::http::message::CookieAttr;
use httpcall::http::parser::{HeaderLine, parse_header_line, parse_set_cookie, parse_status_line};
use httpcall::http::response::ResponseMessage;

#[test]
fn test_parse_status_line() {
    let status = parse_status_line("HTTP/1.1 200 OK\r\n").unwrap();

    assert_eq!(status.version, "HTTP/1.1");
    assert_eq!(status.code, Some(200));
    assert_eq!(status.reason, "OK");
}

#[test]
fn test_parse_status_line_multi_word_reason() {
    let status = parse_status_line("HTTP/1.0 503 Service   Unavailable").unwrap();

    assert_eq!(status.code, Some(503));
    assert_eq!(status.reason, "Service Unavailable");
}

#[test]
fn test_parse_status_line_is_case_insensitive() {
    let status = parse_status_line("http/1.1 204").unwrap();

    assert_eq!(status.code, Some(204));
    assert_eq!(status.reason, "");
}

#[test]
fn test_parse_field_line_lowercases_and_trims() {
    match parse_header_line("  Content-Type :  text/html; charset=utf-8 \r\n") {
        HeaderLine::Field { name, value } => {
            assert_eq!(name, "content-type");
            assert_eq!(value, "text/html; charset=utf-8");
        }
        other => panic!("expected field, got {:?}", other),
    }
}

#[test]
fn test_parse_field_splits_on_first_colon() {
    match parse_header_line("Location: http://example.com:8080/next") {
        HeaderLine::Field { name, value } => {
            assert_eq!(name, "location");
            assert_eq!(value, "http://example.com:8080/next");
        }
        other => panic!("expected field, got {:?}", other),
    }
}

#[test]
fn test_colon_less_lines_are_ignored() {
    for line in ["garbage", "", "\r\n", "HTT 200 OK", "   HTTP/1.1 200 OK"] {
        assert_eq!(parse_header_line(line), HeaderLine::Ignored, "line {:?}", line);
    }
}

#[test]
fn test_ignored_line_leaves_response_unchanged() {
    let mut response = ResponseMessage::new();
    response.parse_header_line("HTTP/1.1 200 OK");
    response.parse_header_line("X-One: 1");

    assert!(!response.parse_header_line("not a header"));
    assert_eq!(response.status_code(), Some(200));
    assert_eq!(response.reason_phrase(), "OK");
    assert_eq!(response.message().headers().len(), 1);
}

#[test]
fn test_set_cookie_round_trip() {
    let mut response = ResponseMessage::new();
    response.parse_header_line("HTTP/1.1 200 OK");
    assert!(response.parse_header_line("Set-Cookie: a=1; Path=/; HttpOnly"));

    let cookie = response.cookie_entry("a").unwrap();
    assert_eq!(cookie.value.as_deref(), Some("1"));
    assert_eq!(cookie.attributes.len(), 2);
    assert_eq!(cookie.attribute("Path"), Some(&CookieAttr::Value("/".to_string())));
    assert_eq!(cookie.attribute("HttpOnly"), Some(&CookieAttr::Flag));
    assert_eq!(response.header("set-cookie"), Some("a=1; Path=/; HttpOnly"));
}

#[test]
fn test_set_cookie_valueless_first_segment() {
    let (name, cookie) = parse_set_cookie("session; Secure").unwrap();

    assert_eq!(name, "session");
    assert_eq!(cookie.value, None);
    assert!(cookie.attribute("Secure").unwrap().is_flag());
}

#[test]
fn test_set_cookie_value_keeps_later_equals() {
    let (name, cookie) = parse_set_cookie("token=abc=def; Max-Age=60").unwrap();

    assert_eq!(name, "token");
    assert_eq!(cookie.value.as_deref(), Some("abc=def"));
    assert_eq!(cookie.attribute("Max-Age").and_then(|a| a.as_str()), Some("60"));
}

#[test]
fn test_set_cookie_empty_name_is_ignored() {
    assert!(parse_set_cookie("=orphan; Path=/").is_none());
    assert!(parse_set_cookie("").is_none());
}

#[test]
fn test_empty_set_cookie_header_stores_no_cookie() {
    let mut response = ResponseMessage::new();
    response.parse_header_line("Set-Cookie:");

    assert!(response.message().cookies().is_empty());
    assert_eq!(response.header("set-cookie"), Some(""));
}
