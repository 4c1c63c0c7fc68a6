//! Operator confirmation before any mutating remote call
//!
//! Under the interactive policy the operator is shown the post and must type
//! back a single random character. The character is drawn once per run, so a
//! reflexive "y" or Enter never approves a post.

use std::fmt;
use std::str::FromStr;

use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};

use crate::error::{Result, TootgateError};

/// Characters a confirmation token is drawn from
///
/// Excludes look-alikes (`0`/`O`, `1`/`I`/`l`) and the letters of `y`/`n`.
pub const TOKEN_ALPHABET: &[u8] = b"ABCDEFGHJKMPQRSTUVWXZ23456789";

/// Reply that cancels the post regardless of the token
pub const CANCEL_SENTINEL: &str = "cancel";

/// When to ask the operator before posting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfirmationPolicy {
    /// Post without asking
    Always,
    /// Never post; dry runs
    Never,
    /// Ask, and require the token
    #[default]
    Interactive,
}

impl FromStr for ConfirmationPolicy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "always" => Ok(ConfirmationPolicy::Always),
            "never" => Ok(ConfirmationPolicy::Never),
            "interactive" => Ok(ConfirmationPolicy::Interactive),
            _ => Err(format!(
                "Invalid confirmation policy: '{}'. Valid options: always, never, interactive",
                s
            )),
        }
    }
}

impl fmt::Display for ConfirmationPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfirmationPolicy::Always => write!(f, "always"),
            ConfirmationPolicy::Never => write!(f, "never"),
            ConfirmationPolicy::Interactive => write!(f, "interactive"),
        }
    }
}

/// Draw a token from [`TOKEN_ALPHABET`]
pub fn draw_token() -> char {
    let mut rng = rand::thread_rng();
    // The alphabet is a non-empty constant
    TOKEN_ALPHABET.choose(&mut rng).map(|&b| b as char).unwrap_or('A')
}

/// What the operator is asked to approve
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfirmationPrompt {
    pub token: char,
    pub text: String,
    pub image_name: Option<String>,
    pub alt_text: String,
    pub month: u32,
    pub day: u32,
}

impl fmt::Display for ConfirmationPrompt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Post for {:02}/{:02}:", self.month, self.day)?;
        writeln!(f, "  Text:  {}", self.text)?;
        match &self.image_name {
            Some(name) => {
                writeln!(f, "  Image: {}", name)?;
                writeln!(f, "  Alt:   {}", self.alt_text)?;
            }
            None => writeln!(f, "  Image: (none)")?,
        }
        write!(
            f,
            "Type '{}' to post, or '{}' to stop",
            self.token, CANCEL_SENTINEL
        )
    }
}

/// Operator's answer to a prompt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfirmationReply {
    Entered(String),
    Cancelled,
}

/// Source of operator replies
pub trait ConfirmationProvider: Send {
    fn confirm(&mut self, prompt: &ConfirmationPrompt) -> Result<ConfirmationReply>;
}

/// Reads the reply from the terminal
///
/// Without a terminal on stdin there is nobody to ask, so the post is cancelled.
#[derive(Debug, Default)]
pub struct ConsoleConfirmation;

impl ConfirmationProvider for ConsoleConfirmation {
    fn confirm(&mut self, prompt: &ConfirmationPrompt) -> Result<ConfirmationReply> {
        if !atty::is(atty::Stream::Stdin) {
            tracing::warn!("stdin is not a terminal; cancelling interactive confirmation");
            return Ok(ConfirmationReply::Cancelled);
        }

        eprintln!("{}", prompt);
        let answer: String = dialoguer::Input::new()
            .with_prompt("Confirm")
            .allow_empty(true)
            .interact_text()
            .map_err(|e| TootgateError::InvalidInput(format!("Failed to read confirmation: {}", e)))?;

        Ok(ConfirmationReply::Entered(answer))
    }
}

/// Replays canned replies, for tests and unattended runs
#[derive(Debug, Default)]
pub struct ScriptedConfirmation {
    replies: Vec<ConfirmationReply>,
    echo_token: bool,
    prompts: Vec<ConfirmationPrompt>,
}

impl ScriptedConfirmation {
    /// Answer with `replies` in order, then cancel
    pub fn new(replies: Vec<ConfirmationReply>) -> Self {
        Self {
            replies,
            ..Default::default()
        }
    }

    /// Always answer with the prompt's own token
    pub fn echo_token() -> Self {
        Self {
            echo_token: true,
            ..Default::default()
        }
    }

    pub fn entering(text: &str) -> Self {
        Self::new(vec![ConfirmationReply::Entered(text.to_string())])
    }

    pub fn cancelling() -> Self {
        Self::new(vec![ConfirmationReply::Cancelled])
    }

    /// Prompts seen so far
    pub fn prompts(&self) -> &[ConfirmationPrompt] {
        &self.prompts
    }

    pub fn call_count(&self) -> usize {
        self.prompts.len()
    }
}

impl ConfirmationProvider for ScriptedConfirmation {
    fn confirm(&mut self, prompt: &ConfirmationPrompt) -> Result<ConfirmationReply> {
        self.prompts.push(prompt.clone());
        if self.echo_token {
            return Ok(ConfirmationReply::Entered(prompt.token.to_string()));
        }
        if self.replies.is_empty() {
            Ok(ConfirmationReply::Cancelled)
        } else {
            Ok(self.replies.remove(0))
        }
    }
}

/// Why the gate refused
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum Refusal {
    PolicyDeclined,
    OperatorCancelled,
    TokenMismatch { expected: char, entered: String },
}

impl fmt::Display for Refusal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Refusal::PolicyDeclined => write!(f, "confirmation policy is 'never'"),
            Refusal::OperatorCancelled => write!(f, "cancelled by operator"),
            Refusal::TokenMismatch { expected, entered } => {
                write!(f, "expected '{}', got '{}'", expected, entered)
            }
        }
    }
}

/// Policy plus the token drawn for this run
#[derive(Debug, Clone, Copy)]
pub struct ConfirmationGate {
    policy: ConfirmationPolicy,
    token: char,
}

impl ConfirmationGate {
    pub fn new(policy: ConfirmationPolicy) -> Self {
        Self::with_token(policy, draw_token())
    }

    pub fn with_token(policy: ConfirmationPolicy, token: char) -> Self {
        Self { policy, token }
    }

    pub fn policy(&self) -> ConfirmationPolicy {
        self.policy
    }

    pub fn token(&self) -> char {
        self.token
    }

    /// Decide whether to proceed
    ///
    /// The provider is consulted only under [`ConfirmationPolicy::Interactive`].
    /// The reply is trimmed; the token match is exact and case-sensitive.
    pub fn evaluate(
        &self,
        prompt: ConfirmationPrompt,
        provider: &mut dyn ConfirmationProvider,
    ) -> Result<std::result::Result<(), Refusal>> {
        match self.policy {
            ConfirmationPolicy::Always => Ok(Ok(())),
            ConfirmationPolicy::Never => Ok(Err(Refusal::PolicyDeclined)),
            ConfirmationPolicy::Interactive => {
                let prompt = ConfirmationPrompt {
                    token: self.token,
                    ..prompt
                };
                match provider.confirm(&prompt)? {
                    ConfirmationReply::Cancelled => Ok(Err(Refusal::OperatorCancelled)),
                    ConfirmationReply::Entered(text) => {
                        let text = text.trim();
                        if text.eq_ignore_ascii_case(CANCEL_SENTINEL) {
                            Ok(Err(Refusal::OperatorCancelled))
                        } else if text.len() == self.token.len_utf8()
                            && text.starts_with(self.token)
                        {
                            Ok(Ok(()))
                        } else {
                            Ok(Err(Refusal::TokenMismatch {
                                expected: self.token,
                                entered: text.to_string(),
                            }))
                        }
                    }
                }
            }
        }
    }
}
