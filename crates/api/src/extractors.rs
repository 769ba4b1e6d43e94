//! Request extractors.

use std::net::{IpAddr, SocketAddr};

use axum::{
    Json,
    extract::{ConnectInfo, FromRequest, FromRequestParts, Request},
    http::{HeaderMap, header::USER_AGENT, request::Parts},
};
use serde::de::DeserializeOwned;
use tempforms_common::AppError;
use tempforms_core::SubmitterInfo;

use crate::middleware::AppState;

/// Client address. Forwarding headers (`X-Forwarded-For`, then `X-Real-IP`)
/// are only read when `trust_proxy` is set; otherwise the socket decides.
pub fn client_ip(
    headers: &HeaderMap,
    socket: Option<SocketAddr>,
    trust_proxy: bool,
) -> Option<IpAddr> {
    if !trust_proxy {
        return socket.map(|addr| addr.ip());
    }

    let forwarded = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .and_then(|first| first.trim().parse::<IpAddr>().ok());
    if forwarded.is_some() {
        return forwarded;
    }

    let real_ip = headers
        .get("x-real-ip")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<IpAddr>().ok());
    if real_ip.is_some() {
        return real_ip;
    }

    socket.map(|addr| addr.ip())
}

fn socket_addr(parts: &Parts) -> Option<SocketAddr> {
    parts
        .extensions
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr)
}

/// Address and user agent of whoever submits a response.
#[derive(Debug, Clone)]
pub struct Submitter(pub SubmitterInfo);

impl FromRequestParts<AppState> for Submitter {
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let ip = client_ip(&parts.headers, socket_addr(parts), state.trust_proxy_headers)
            .map(|ip| ip.to_string());
        let user_agent = parts
            .headers
            .get(USER_AGENT)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        Ok(Self(SubmitterInfo { ip, user_agent }))
    }
}

/// JSON body whose rejections render as `400` in the API error shape.
#[derive(Debug, Clone)]
pub struct JsonBody<T>(pub T);

impl<S, T> FromRequest<S> for JsonBody<T>
where
    S: Send + Sync,
    T: DeserializeOwned,
{
    type Rejection = AppError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        Json::<T>::from_request(req, state)
            .await
            .map(|Json(value)| Self(value))
            .map_err(|rejection| AppError::BadRequest(rejection.body_text()))
    }
}
