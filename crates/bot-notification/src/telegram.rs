//! Telegram 알림 서비스.
//!
//! Telegram Bot API의 sendMessage를 통해 트레이딩 알림을 전송합니다.

use async_trait::async_trait;
use serde_json::json;
use tracing::{debug, error, info, warn};

use crate::types::{
    Notification, NotificationError, NotificationEvent, NotificationPriority, NotificationResult,
    NotificationSender,
};

/// Telegram 알림 전송 설정.
#[derive(Debug, Clone)]
pub struct TelegramConfig {
    /// Bot API 토큰
    pub bot_token: String,
    /// 수신 채팅 ID
    pub chat_id: String,
    /// 전송 활성화 여부
    pub enabled: bool,
}

impl TelegramConfig {
    /// 새 Telegram 설정을 생성합니다.
    pub fn new(bot_token: String, chat_id: String) -> Self {
        Self {
            bot_token,
            chat_id,
            enabled: true,
        }
    }

    /// 환경 변수에서 설정을 생성합니다.
    pub fn from_env() -> Option<Self> {
        let bot_token = std::env::var("TELEGRAM_BOT_TOKEN").ok()?;
        let chat_id = std::env::var("TELEGRAM_CHAT_ID").ok()?;
        let enabled = std::env::var("TELEGRAM_ENABLED")
            .map(|v| v.to_lowercase() == "true")
            .unwrap_or(true);

        Some(Self {
            bot_token,
            chat_id,
            enabled,
        })
    }
}

/// Telegram 알림 전송기.
pub struct TelegramSender {
    config: TelegramConfig,
    client: reqwest::Client,
}

impl TelegramSender {
    /// 새 Telegram 전송기를 생성합니다.
    pub fn new(config: TelegramConfig) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
        }
    }

    /// 환경 변수에서 전송기를 생성합니다.
    pub fn from_env() -> Option<Self> {
        TelegramConfig::from_env().map(Self::new)
    }

    /// 우선순위 이모지.
    fn priority_emoji(priority: &NotificationPriority) -> &'static str {
        match priority {
            NotificationPriority::Low => "ℹ️",
            NotificationPriority::Normal => "📌",
            NotificationPriority::High => "⚠️",
            NotificationPriority::Critical => "🚨",
        }
    }

    /// 알림을 Telegram HTML 메시지로 포맷합니다.
    fn format_message(&self, notification: &Notification) -> String {
        let emoji = Self::priority_emoji(&notification.priority);

        match &notification.event {
            NotificationEvent::PositionOpened {
                symbol,
                owner,
                side,
                quantity,
                entry_price,
                leverage,
            } => {
                format!(
                    "🟢 <b>포지션 진입</b>\n\
                     심볼: <code>{symbol}</code>\n\
                     소유자: {owner}\n\
                     방향: {side} x{leverage}\n\
                     수량: {quantity}\n\
                     진입가: {entry_price}"
                )
            }

            NotificationEvent::PositionClosed {
                symbol,
                owner,
                side,
                quantity,
                entry_price,
                exit_price,
                reason,
            } => {
                format!(
                    "🔴 <b>포지션 청산</b>\n\
                     심볼: <code>{symbol}</code>\n\
                     소유자: {owner}\n\
                     방향: {side}\n\
                     수량: {quantity}\n\
                     진입가: {entry_price} → 청산가: {exit_price}\n\
                     사유: {reason}"
                )
            }

            NotificationEvent::PositionModified {
                symbol,
                owner,
                detail,
            } => {
                format!(
                    "{emoji} <b>포지션 수정</b>\n\
                     심볼: <code>{symbol}</code>\n\
                     소유자: {owner}\n\
                     내용: {detail}"
                )
            }

            NotificationEvent::PositionFailed {
                symbol,
                owner,
                reason,
            } => {
                format!(
                    "{emoji} <b>포지션 실패</b>\n\
                     심볼: <code>{symbol}</code>\n\
                     소유자: {owner}\n\
                     사유: {reason}"
                )
            }

            NotificationEvent::DiscrepancyFound {
                symbol,
                kind,
                detail,
            } => {
                format!(
                    "{emoji} <b>불일치 자동 해결</b>\n\
                     심볼: <code>{symbol}</code>\n\
                     종류: {kind}\n\
                     내용: {detail}"
                )
            }

            NotificationEvent::DiscrepancyEscalated {
                symbol,
                kind,
                detail,
            } => {
                format!(
                    "{emoji} <b>불일치 확인 필요</b>\n\
                     심볼: <code>{symbol}</code>\n\
                     종류: {kind}\n\
                     내용: {detail}\n\
                     자동 해결이 불가하여 수동 확인이 필요합니다."
                )
            }

            NotificationEvent::ReconciliationFailure {
                consecutive_failures,
                reason,
            } => {
                format!(
                    "{emoji} <b>정합성 확인 실패</b>\n\
                     연속 실패: {consecutive_failures}회\n\
                     사유: {reason}"
                )
            }
        }
    }

    /// Bot API로 메시지를 전송합니다.
    async fn send_message(&self, text: String) -> NotificationResult<()> {
        let url = format!(
            "https://api.telegram.org/bot{}/sendMessage",
            self.config.bot_token
        );
        let payload = json!({
            "chat_id": self.config.chat_id,
            "text": text,
            "parse_mode": "HTML",
            "disable_web_page_preview": true,
        });

        debug!("Sending Telegram message");

        let response = self
            .client
            .post(&url)
            .json(&payload)
            .send()
            .await
            .map_err(NotificationError::Network)?;

        if response.status().is_success() {
            info!("Telegram 알림 전송 완료");
            Ok(())
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();

            if status.as_u16() == 429 {
                warn!("Telegram rate limited");
                return Err(NotificationError::RateLimited(60));
            }

            error!("Telegram 전송 실패: {} - {}", status, body);
            Err(NotificationError::SendFailed(format!(
                "HTTP {}: {}",
                status, body
            )))
        }
    }

    /// 테스트 메시지를 전송합니다.
    pub async fn send_test(&self) -> NotificationResult<()> {
        self.send_message(
            "✓ <b>Telegram 알림 설정 완료</b>\n포지션 알림을 이 채팅으로 받으실 수 있습니다."
                .to_string(),
        )
        .await
    }
}

#[async_trait]
impl NotificationSender for TelegramSender {
    async fn send(&self, notification: &Notification) -> NotificationResult<()> {
        if !self.is_enabled() {
            debug!("Telegram 알림이 비활성화되어 있습니다");
            return Ok(());
        }

        let text = self.format_message(notification);
        self.send_message(text).await
    }

    fn is_enabled(&self) -> bool {
        self.config.enabled && !self.config.bot_token.is_empty() && !self.config.chat_id.is_empty()
    }

    fn name(&self) -> &str {
        "telegram"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bot_core::{DiscrepancyKind, Side};
    use rust_decimal_macros::dec;

    fn sender() -> TelegramSender {
        TelegramSender::new(TelegramConfig::new("token".to_string(), "12345".to_string()))
    }

    #[test]
    fn test_telegram_config_new() {
        let config = TelegramConfig::new("token".to_string(), "12345".to_string());
        assert!(config.enabled);
        assert_eq!(config.chat_id, "12345");
    }

    #[test]
    fn test_format_position_opened() {
        let notification = Notification::new(NotificationEvent::PositionOpened {
            symbol: "BTCUSDT".to_string(),
            owner: "TFPE".to_string(),
            side: Side::Long,
            quantity: dec!(0.01),
            entry_price: dec!(50000),
            leverage: 10,
        });

        let text = sender().format_message(&notification);
        assert!(text.contains("BTCUSDT"));
        assert!(text.contains("TFPE"));
        assert!(text.contains("x10"));
    }

    #[test]
    fn test_format_escalation_mentions_kind() {
        let notification = Notification::new(NotificationEvent::DiscrepancyEscalated {
            symbol: "ETHUSDT".to_string(),
            kind: DiscrepancyKind::UnresolvedOwner,
            detail: "전략 2개 후보".to_string(),
        });

        let text = sender().format_message(&notification);
        assert!(text.contains("ETHUSDT"));
        assert!(text.contains("UNRESOLVED_OWNER"));
    }

    #[test]
    fn test_disabled_sender_reports_disabled() {
        let mut config = TelegramConfig::new("token".to_string(), "12345".to_string());
        config.enabled = false;
        let sender = TelegramSender::new(config);
        assert!(!sender.is_enabled());
    }
}
