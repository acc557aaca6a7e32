//! Shared terminal icons with plain-text fallbacks.

use console::Emoji;

// Status
pub static CHECK: Emoji<'_, '_> = Emoji("✅ ", "[OK]");
pub static CROSS: Emoji<'_, '_> = Emoji("❌ ", "[ERR]");
pub static SPARKLE: Emoji<'_, '_> = Emoji("✨ ", "*");
pub static WARN: Emoji<'_, '_> = Emoji("⚠️  ", "[!]");

// Files
pub static FOLDER: Emoji<'_, '_> = Emoji("📁 ", "");
pub static FILE_NEW: Emoji<'_, '_> = Emoji("📄 ", "+");

// Build
pub static PLAN: Emoji<'_, '_> = Emoji("📋 ", "[PLAN]");
pub static ABANDONED: Emoji<'_, '_> = Emoji("🔄 ", "[ABANDON]");
pub static BOOT: Emoji<'_, '_> = Emoji("🚀 ", "[BOOT]");
