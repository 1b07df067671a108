//! 로그인 토큰 검증 서비스
//!
//! HS256 JWT를 검증하고, 토큰의 사용자 ID와 존 ID가 요청 및 서버 설정과
//! 일치하는지 확인합니다.

use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::protocol::Credentials;
use crate::tool::error::{AuthFailure, GatewayError, GatewayResult};

/// JWT에 포함될 클레임 구조체
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Claims {
    /// 사용자 고유 ID (subject)
    pub sub: u64,
    /// 발급 대상 존
    pub zone_id: u32,
    /// 토큰 만료 시간 (Unix timestamp, 초 단위)
    pub exp: usize,
    /// 발급 시간
    pub iat: usize,
}

/// 토큰 발급 및 검증
#[derive(Clone)]
pub struct AuthService {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    zone_id: u32,
}

impl AuthService {
    pub fn new(secret_key: &str, zone_id: u32) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(secret_key.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret_key.as_bytes()),
            zone_id,
        }
    }

    pub fn zone_id(&self) -> u32 {
        self.zone_id
    }

    /// 토큰 발급 (로그인 서버/테스트용)
    pub fn generate_token(&self, user_id: u64, zone_id: u32, ttl_secs: i64) -> GatewayResult<String> {
        let now = chrono::Utc::now().timestamp();
        let claims = Claims {
            sub: user_id,
            zone_id,
            exp: (now + ttl_secs).max(0) as usize,
            iat: now.max(0) as usize,
        };
        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .map_err(|e| GatewayError::Protocol(format!("토큰 생성 실패: {}", e)))
    }

    /// 로그인/재연결 자격 증명 검증
    ///
    /// 서명·만료·사용자 불일치는 `InvalidToken`, 존 불일치는 `ZoneIdError`입니다.
    pub fn verify(&self, credentials: &Credentials) -> GatewayResult<Claims> {
        if credentials.zone_id != self.zone_id {
            debug!(
                "존 불일치: 요청 {} / 서버 {} (사용자 {})",
                credentials.zone_id, self.zone_id, credentials.user_id
            );
            return Err(GatewayError::Auth(AuthFailure::ZoneIdError));
        }

        let validation = Validation::new(Algorithm::HS256);
        let claims = decode::<Claims>(&credentials.token, &self.decoding_key, &validation)
            .map_err(|e| {
                debug!("토큰 검증 실패 (사용자 {}): {}", credentials.user_id, e);
                GatewayError::Auth(AuthFailure::InvalidToken)
            })?
            .claims;

        if claims.sub != credentials.user_id {
            return Err(GatewayError::Auth(AuthFailure::InvalidToken));
        }
        if claims.zone_id != self.zone_id {
            return Err(GatewayError::Auth(AuthFailure::ZoneIdError));
        }

        Ok(claims)
    }
}
