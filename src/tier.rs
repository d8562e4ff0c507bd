use thiserror::Error;

use crate::models::{SocialAccount, SocialPlatform, User};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConnectDenied {
  #[error("{platform} accounts require a premium subscription")]
  PremiumRequired { platform: SocialPlatform },

  #[error("account limit reached ({limit} connected accounts in total)")]
  TotalLimitReached { limit: u32 },

  #[error("{platform} account limit reached ({limit})")]
  PlatformLimitReached { platform: SocialPlatform, limit: u32 },
}

impl ConnectDenied {
  pub fn code(&self) -> &'static str {
    match self {
      ConnectDenied::PremiumRequired { .. } => "premium_required",
      ConnectDenied::TotalLimitReached { .. } => "total_limit_reached",
      ConnectDenied::PlatformLimitReached { .. } => "platform_limit_reached",
    }
  }
}

/// Checks whether `user` may connect one more `platform` account. `existing` is the
/// user's current account list; accounts of other users are ignored.
pub fn check_can_connect(user: &User, existing: &[SocialAccount], platform: SocialPlatform) -> Result<(), ConnectDenied> {
  if platform.is_premium_only() && !user.is_premium() {
    return Err(ConnectDenied::PremiumRequired { platform });
  }

  let owned: Vec<&SocialAccount> = existing.iter().filter(|a| a.user_id == user.uid).collect();
  let limits = user.account_limits;

  let total = owned.len() as u32;
  if total >= limits.max_total {
    return Err(ConnectDenied::TotalLimitReached {
      limit: limits.max_total,
    });
  }

  let on_platform = owned.iter().filter(|a| a.platform == platform).count() as u32;
  let platform_limit = limits.max_for(platform);
  if on_platform >= platform_limit {
    return Err(ConnectDenied::PlatformLimitReached {
      platform,
      limit: platform_limit,
    });
  }

  Ok(())
}
