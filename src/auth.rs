#![allow(dead_code)]
use axum::{
    body::Body,
    http::{Request, StatusCode},
    middleware::{self, Next},
    response::Response,
};

/// Bearer-token middleware guarding the operator-facing HTTP surface (§6).
/// Distinct from the inverter's own device-auth handshake in `inverter_auth`.
pub fn auth_layer(token: String) -> impl Clone {
    middleware::from_fn::<_, Response>(move |req: Request<Body>, next: Next| {
        let token = token.clone();
        async move {
            let auth_header = req
                .headers()
                .get(axum::http::header::AUTHORIZATION)
                .and_then(|v| v.to_str().ok());

            match auth_header {
                Some(auth) if auth.starts_with("Bearer ") && &auth[7..] == token => {
                    Ok::<_, StatusCode>(next.run(req).await)
                }
                _ => Err(StatusCode::UNAUTHORIZED),
            }
        }
    })
}
