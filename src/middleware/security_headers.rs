use axum::{
    body::Body,
    http::{HeaderName, HeaderValue, Request, Response},
    middleware::Next,
};

// JSON-only API: nothing may be framed, sniffed or leak a referrer.
const HEADERS: [(&str, &str); 3] = [
    ("x-content-type-options", "nosniff"),
    ("referrer-policy", "no-referrer"),
    ("content-security-policy", "default-src 'none'; frame-ancestors 'none'"),
];

pub async fn security_headers_middleware(req: Request<Body>, next: Next) -> Response<Body> {
    let mut res = next.run(req).await;

    for (name, value) in HEADERS {
        // handlers may set their own
        if res.headers().get(name).is_none() {
            res.headers_mut()
                .insert(HeaderName::from_static(name), HeaderValue::from_static(value));
        }
    }

    res
}
