//! 身份相关实体
//!
//! 认证由外部模块完成，核心只消费认证结果（用户名、头像、简介）。

use serde::{Deserialize, Serialize};

use crate::value_objects::{AvatarUrl, Username};

/// 在线列表中展示的简介最大字符数
pub const BIO_EXCERPT_CHARS: usize = 100;

/// 身份协作方解析出的用户资料
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    pub username: Username,
    pub avatar: AvatarUrl,
    pub bio: String,
}

impl UserProfile {
    pub fn new(username: Username, avatar: AvatarUrl, bio: impl Into<String>) -> Self {
        Self {
            username,
            avatar,
            bio: bio.into(),
        }
    }

    /// 简介摘要，按字符截断而不是按字节。
    pub fn bio_excerpt(&self) -> String {
        self.bio.chars().take(BIO_EXCERPT_CHARS).collect()
    }
}

/// 连接发起方的身份
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Principal {
    Anonymous,
    Authenticated(Username),
}

impl Principal {
    /// 由上游认证层写入的用户名构造身份，缺失或非法时视为匿名。
    pub fn from_username(raw: Option<&str>) -> Self {
        match raw.map(Username::parse) {
            Some(Ok(username)) => Principal::Authenticated(username),
            _ => Principal::Anonymous,
        }
    }

    pub fn username(&self) -> Option<&Username> {
        match self {
            Principal::Anonymous => None,
            Principal::Authenticated(username) => Some(username),
        }
    }

    pub fn is_anonymous(&self) -> bool {
        matches!(self, Principal::Anonymous)
    }
}
