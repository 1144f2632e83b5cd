use async_trait::async_trait;
use domain::UserId;

use crate::error::ApplicationError;

/// 校验 bearer 凭证，得到用户身份
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait IdentityVerifier: Send + Sync {
    async fn verify(&self, token: &str) -> Result<UserId, ApplicationError>;
}

/// 从 `Authorization` 头的值中取出 bearer token，scheme 不区分大小写
pub fn bearer_token(header: Option<&str>) -> Option<&str> {
    let (scheme, token) = header?.trim().split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = token.trim();
    (!token.is_empty()).then_some(token)
}
