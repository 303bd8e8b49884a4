//! Approval gate for suspended runs.

use anyhow::Result;
use dialoguer::{Select, theme::ColorfulTheme};

use crate::autonomy::{Approval, Suspension};

pub struct ApprovalGate {
    /// Auto-approve suspensions without Critical findings (`--yes`).
    pub skip_all: bool,
    /// Whether a human can answer prompts.
    pub interactive: bool,
}

impl ApprovalGate {
    pub fn new(skip_all: bool) -> Self {
        Self {
            skip_all,
            interactive: console::user_attended(),
        }
    }

    /// Decision that needs no prompt, if any.
    ///
    /// Critical suspensions are never auto-approved; without a terminal they
    /// cancel the run.
    pub fn auto_decision(&self, suspension: &Suspension) -> Option<Approval> {
        if suspension.requires_acknowledgement() {
            return (!self.interactive).then_some(Approval::Cancel);
        }
        if self.skip_all || !self.interactive {
            return Some(Approval::Continue);
        }
        None
    }

    pub fn decide(&mut self, suspension: &Suspension) -> Result<Approval> {
        if let Some(approval) = self.auto_decision(suspension) {
            let note = match approval {
                Approval::Continue if self.skip_all => "Auto-approved (--yes flag)",
                Approval::Continue => "Auto-approved (non-interactive)",
                _ => "Critical findings need a decision; cancelling (non-interactive)",
            };
            println!("  {}", console::style(note).dim());
            return Ok(approval);
        }

        if suspension.requires_acknowledgement() {
            self.prompt_critical()
        } else {
            self.prompt_continue()
        }
    }

    fn prompt_continue(&mut self) -> Result<Approval> {
        let options = &[
            "Continue to the next phase",
            "Continue and auto-approve remaining suspensions (--yes)",
            "Stop the review",
        ];

        let selection = Select::with_theme(&ColorfulTheme::default())
            .with_prompt("Proceed?")
            .items(options)
            .default(0)
            .interact()?;

        match selection {
            0 => Ok(Approval::Continue),
            1 => {
                self.skip_all = true;
                Ok(Approval::Continue)
            }
            _ => Ok(Approval::Cancel),
        }
    }

    fn prompt_critical(&mut self) -> Result<Approval> {
        let options = &[
            "Retry the failed phase(s)",
            "Acknowledge critical findings and continue",
            "Stop the review",
        ];

        let selection = Select::with_theme(&ColorfulTheme::default())
            .with_prompt("Critical findings were reported. How do you want to proceed?")
            .items(options)
            .default(2)
            .interact()?;

        match selection {
            0 => Ok(Approval::RetryFailed),
            1 => Ok(Approval::AcknowledgeCritical),
            _ => Ok(Approval::Cancel),
        }
    }
}
