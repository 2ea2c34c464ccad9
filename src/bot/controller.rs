//! Conversation controller — the per-user state machine.
//!
//! Every inbound event lands here with the sender's identity. The controller
//! decides what the bot currently expects from that user, runs validation,
//! rate limiting, and collaborator calls, and returns the replies to send.
//! All failures are absorbed into user-facing messages; nothing here
//! propagates far enough to crash the process.

use std::sync::Arc;

use chrono::Utc;
use tracing::{error, info, warn};

use crate::barcode::BarcodeDecoder;
use crate::bot::format;
use crate::bot::session::{SessionMap, SessionState};
use crate::gateway::BalanceGateway;
use crate::rate_limit::RateLimiter;
use crate::store::UserStore;
use crate::validator::validate_card_code;

const WELCOME: &str = "Welcome to the Soup Card bot! 🍲\n\n\
    I can check the balance and transaction history of your card.\n\n\
    Use the buttons below:";

const HELP: &str = "Available commands:\n\n\
    /start - Start the bot\n\
    /balance - Check the balance\n\
    /changecode - Change the card code\n\
    /help - Show this help";

const ASK_FOR_CODE: &str = "Please send your Soup Card code (13 digits, starts with 2001) \
    or send a photo of the card barcode 📸";

const ASK_FOR_NEW_CODE: &str = "Send the new Soup Card code (13 digits, starts with 2001) \
    or send a photo of the card barcode 📸";

const NO_SAVED_CODE: &str = "You have no saved card code. Please send your card code:";

const CHECKING_CODE: &str = "Checking the code... ⏳";
const FETCHING_BALANCE: &str = "Fetching your balance... ⏳";
const SCANNING_BARCODE: &str = "Scanning the barcode... 🔍";

const CODE_SAVED: &str = "✅ Code saved!";

const CODE_LOOKUP_FAILED: &str =
    "❌ Couldn't verify the code. Make sure it is correct and try again.";

const BALANCE_LOOKUP_FAILED: &str = "❌ Couldn't fetch the balance. Try again later.";

const BARCODE_NOT_FOUND: &str = "❌ Couldn't read a barcode in the photo.\n\n\
    Try to:\n\
    • Take the photo in good light\n\
    • Hold the camera steady\n\
    • Make sure the barcode is clearly visible\n\n\
    Or type the code manually (13 digits).";

const PHOTO_UNAVAILABLE: &str = "❌ Couldn't process the photo. Try again or type the code.";

const STORAGE_FAILED: &str = "❌ Something went wrong on our side. Please try again.";

/// Reply markup attached to an outgoing message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyMarkup {
    None,
    /// Inline menu with "check balance" and "change code" actions.
    MainMenu,
    /// Reply keyboard offering a photo-submission button.
    PhotoKeyboard,
    /// Remove any active reply keyboard.
    RemoveKeyboard,
}

/// One outgoing message instruction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub text: String,
    pub markup: ReplyMarkup,
}

impl Reply {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            markup: ReplyMarkup::None,
        }
    }

    pub fn with_markup(text: impl Into<String>, markup: ReplyMarkup) -> Self {
        Self {
            text: text.into(),
            markup,
        }
    }
}

/// Inline-menu actions. Buttons and the equivalent commands converge on the
/// same operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallbackAction {
    CheckBalance,
    ChangeCode,
}

/// Profile fields captured from the transport on first contact.
#[derive(Debug, Clone, Default)]
pub struct ContactInfo {
    pub username: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
}

/// The conversation controller. One instance serves all users; per-user
/// state lives in the session map and rate limiter.
pub struct Controller {
    store: Arc<dyn UserStore>,
    gateway: Arc<dyn BalanceGateway>,
    decoder: Arc<dyn BarcodeDecoder>,
    limiter: RateLimiter,
    sessions: SessionMap,
}

impl Controller {
    pub fn new(
        store: Arc<dyn UserStore>,
        gateway: Arc<dyn BalanceGateway>,
        decoder: Arc<dyn BarcodeDecoder>,
        limiter: RateLimiter,
    ) -> Self {
        Self {
            store,
            gateway,
            decoder,
            limiter,
            sessions: SessionMap::new(),
        }
    }

    /// Current session state for an identity (visible for tests).
    pub async fn session_state(&self, identity: &str) -> SessionState {
        self.sessions.get(identity).await
    }

    // ── Command entry points ────────────────────────────────────────

    /// `/start`: ensure the profile exists, then greet. With a saved code
    /// the user lands in `Idle` with the main menu; without one the bot
    /// asks for the code. Safe to repeat.
    pub async fn handle_start(&self, identity: &str, contact: &ContactInfo) -> Vec<Reply> {
        let user = match self
            .store
            .create_user(
                identity,
                contact.username.as_deref(),
                contact.first_name.as_deref(),
                contact.last_name.as_deref(),
            )
            .await
        {
            Ok(user) => user,
            Err(e) => {
                error!(identity, error = %e, "Failed to ensure user profile");
                return vec![Reply::text(STORAGE_FAILED)];
            }
        };

        if user.card_code.is_some() {
            self.sessions.set(identity, SessionState::Idle).await;
            vec![Reply::with_markup(WELCOME, ReplyMarkup::MainMenu)]
        } else {
            self.sessions.set(identity, SessionState::AwaitingCode).await;
            vec![
                Reply::text(WELCOME),
                Reply::with_markup(ASK_FOR_CODE, ReplyMarkup::PhotoKeyboard),
            ]
        }
    }

    /// `/help`: command list plus the main menu.
    pub async fn handle_help(&self, _identity: &str) -> Vec<Reply> {
        vec![Reply::with_markup(HELP, ReplyMarkup::MainMenu)]
    }

    /// `/balance` command.
    pub async fn handle_balance(&self, identity: &str) -> Vec<Reply> {
        self.run_balance_check(identity).await
    }

    /// `/changecode` command.
    pub async fn handle_change_code(&self, identity: &str) -> Vec<Reply> {
        self.prompt_for_new_code(identity).await
    }

    /// Inline-menu button press. Same operations as the commands.
    pub async fn handle_callback(&self, identity: &str, action: CallbackAction) -> Vec<Reply> {
        match action {
            CallbackAction::CheckBalance => self.run_balance_check(identity).await,
            CallbackAction::ChangeCode => self.prompt_for_new_code(identity).await,
        }
    }

    // ── Free-form input ─────────────────────────────────────────────

    /// Free text. Only meaningful while awaiting a code; otherwise ignored.
    pub async fn handle_text(&self, identity: &str, text: &str) -> Vec<Reply> {
        if self.sessions.get(identity).await != SessionState::AwaitingCode {
            return Vec::new();
        }

        let code = text.trim();
        if let Err(reason) = validate_card_code(code) {
            info!(identity, %reason, "Rejected typed card code");
            return vec![Reply::text(format!("❌ {reason}"))];
        }

        let mut replies = vec![Reply::text(CHECKING_CODE)];
        replies.extend(self.register_code(identity, code, None).await);
        replies
    }

    /// Photo message. `image_url` is `None` when the transport could not
    /// resolve the file; that is reported like any other unprocessable photo.
    pub async fn handle_photo(&self, identity: &str, image_url: Option<&str>) -> Vec<Reply> {
        if self.sessions.get(identity).await != SessionState::AwaitingCode {
            return Vec::new();
        }

        let mut replies = vec![Reply::text(SCANNING_BARCODE)];

        let Some(url) = image_url else {
            warn!(identity, "Photo file could not be resolved");
            replies.push(Reply::text(PHOTO_UNAVAILABLE));
            return replies;
        };

        let Some(decoded) = self.decoder.decode(url).await else {
            replies.push(Reply::text(BARCODE_NOT_FOUND));
            return replies;
        };

        // A decode that fails validation is actionable feedback: show the
        // user what was read so they can correct it by hand.
        if let Err(reason) = validate_card_code(&decoded) {
            info!(identity, %reason, %decoded, "Rejected decoded barcode");
            replies.push(Reply::text(format!(
                "❌ {reason}\n\nDecoded code: {decoded}\n\nPlease type the code manually."
            )));
            return replies;
        }

        replies.push(Reply::text(CHECKING_CODE));
        replies.extend(self.register_code(identity, &decoded, Some(&decoded)).await);
        replies
    }

    // ── Shared operations ───────────────────────────────────────────

    /// The balance-check operation behind both the command and the button.
    /// Rate-limited; the registration flow never passes through here.
    async fn run_balance_check(&self, identity: &str) -> Vec<Reply> {
        if let Some(wait_secs) = self.limiter.check(identity, Utc::now()).await {
            info!(identity, wait_secs, "Balance check rate-limited");
            return vec![Reply::text(format!(
                "⏳ Please wait {wait_secs} seconds before the next balance check."
            ))];
        }

        let code = match self.store.card_code(identity).await {
            Ok(Some(code)) => code,
            Ok(None) => {
                self.sessions.set(identity, SessionState::AwaitingCode).await;
                return vec![Reply::with_markup(NO_SAVED_CODE, ReplyMarkup::PhotoKeyboard)];
            }
            Err(e) => {
                error!(identity, error = %e, "Failed to read saved card code");
                return vec![Reply::text(STORAGE_FAILED)];
            }
        };

        let mut replies = vec![Reply::text(FETCHING_BALANCE)];
        match self.gateway.fetch_balance(&code).await {
            Ok(snapshot) => {
                self.limiter.record(identity, true, Utc::now()).await;
                replies.push(Reply::with_markup(
                    format::balance_report(&snapshot),
                    ReplyMarkup::MainMenu,
                ));
            }
            Err(e) => {
                self.limiter.record(identity, false, Utc::now()).await;
                warn!(identity, error = %e, "Balance lookup failed");
                replies.push(Reply::text(BALANCE_LOOKUP_FAILED));
            }
        }
        replies
    }

    /// The change-code operation behind both the command and the button.
    /// Discards any prior session position.
    async fn prompt_for_new_code(&self, identity: &str) -> Vec<Reply> {
        self.sessions.set(identity, SessionState::AwaitingCode).await;
        vec![Reply::with_markup(
            ASK_FOR_NEW_CODE,
            ReplyMarkup::PhotoKeyboard,
        )]
    }

    /// Confirm a validated code against the gateway, then persist it.
    ///
    /// The gateway call comes first on purpose: a syntactically valid code
    /// that resolves to nothing is never stored. `recognized` carries the
    /// decoded barcode text for the photo path's confirmation message.
    async fn register_code(
        &self,
        identity: &str,
        code: &str,
        recognized: Option<&str>,
    ) -> Vec<Reply> {
        let snapshot = match self.gateway.fetch_balance(code).await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!(identity, error = %e, "Code confirmation lookup failed");
                return vec![Reply::text(CODE_LOOKUP_FAILED)];
            }
        };

        if let Err(e) = self.store.set_card_code(identity, code).await {
            error!(identity, error = %e, "Failed to persist card code");
            return vec![Reply::text(STORAGE_FAILED)];
        }

        self.sessions.set(identity, SessionState::Idle).await;
        info!(identity, "Card code registered");

        let confirmation = match recognized {
            Some(decoded) => Reply::with_markup(
                format!("{CODE_SAVED}\nDecoded code: {decoded}"),
                ReplyMarkup::RemoveKeyboard,
            ),
            None => Reply::text(CODE_SAVED),
        };

        vec![
            confirmation,
            Reply::with_markup(format::balance_report(&snapshot), ReplyMarkup::MainMenu),
        ]
    }
}
