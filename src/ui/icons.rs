//! Shared UI icons.

use console::Emoji;

// Severity markers
pub static WELL_DEFINED: Emoji<'_, '_> = Emoji("✅ ", "[OK] ");
pub static WARNING: Emoji<'_, '_> = Emoji("⚠️  ", "[WARN] ");
pub static CRITICAL: Emoji<'_, '_> = Emoji("❌ ", "[CRIT] ");

// Run indicators
pub static SPARKLE: Emoji<'_, '_> = Emoji("✨ ", "* ");
pub static SKIPPED: Emoji<'_, '_> = Emoji("⏭️  ", "[SKIP] ");
pub static PAUSE: Emoji<'_, '_> = Emoji("⏸️  ", "[PAUSE] ");
pub static SAVE: Emoji<'_, '_> = Emoji("💾 ", "[SAVE] ");
pub static REVIEW: Emoji<'_, '_> = Emoji("🔍 ", "[R] ");
pub static CLOCK: Emoji<'_, '_> = Emoji("⏱️  ", "[T] ");
