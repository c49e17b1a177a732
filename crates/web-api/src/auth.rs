//! 调用方身份
//!
//! 认证由上游网关完成，这里只读取网关注入的用户ID，不再校验凭据。
//! 旧方案ID会经标识解析换成主键ID，成员关系判断才能命中。

use std::convert::Infallible;

use application::{ApplicationError, ConnectionId};
use axum::{
    extract::{FromRef, FromRequestParts},
    http::request::Parts,
};
use domain::{DomainError, UserId};

use crate::{error::ApiError, state::AppState};

pub const USER_ID_HEADER: &str = "x-user-id";
pub const CONNECTION_ID_HEADER: &str = "x-connection-id";

/// 已认证的调用方
#[derive(Debug, Clone)]
pub struct CurrentUser(pub UserId);

impl<S> FromRequestParts<S> for CurrentUser
where
    AppState: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let raw = parts
            .headers
            .get(USER_ID_HEADER)
            .and_then(|header| header.to_str().ok())
            .ok_or_else(|| ApiError::unauthorized("missing X-User-Id header"))?;

        let state = AppState::from_ref(state);
        let id = state
            .identity
            .locate_user_or_canonical(raw)
            .await
            .map_err(|err| match err {
                ApplicationError::Domain(DomainError::InvalidArgument { .. }) => {
                    ApiError::unauthorized("malformed X-User-Id header")
                }
                other => ApiError::from(other),
            })?;
        Ok(Self(id))
    }
}

/// 发起请求的实时连接，用于排除回显；缺失或无法解析时视为没有
#[derive(Debug, Clone, Copy, Default)]
pub struct OriginConnection(pub Option<ConnectionId>);

impl<S> FromRequestParts<S> for OriginConnection
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let origin = parts
            .headers
            .get(CONNECTION_ID_HEADER)
            .and_then(|header| header.to_str().ok())
            .and_then(ConnectionId::parse);
        Ok(Self(origin))
    }
}
