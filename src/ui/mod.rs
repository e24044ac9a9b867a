// UI module - terminal presentation for the interactive setup wizard.
//
// Centered banner blocks, per-step status lines with colored markers,
// prompts, and the download spinner. Purely cosmetic: nothing here carries
// state, and print failures are ignored.

use console::{measure_text_width, style};
use dialoguer::{Input, theme::ColorfulTheme};
use indicatif::ProgressBar;

/// Width of the banner blocks.
const WIDTH: usize = 70;

pub struct Ui;

impl Ui {
    pub fn new() -> Self {
        Self
    }

    fn centered(text: &str) -> String {
        let plain = measure_text_width(text);
        if plain >= WIDTH {
            return text.to_string();
        }
        format!("{}{}", " ".repeat((WIDTH - plain) / 2), text)
    }

    pub fn banner(&self, title: &str) {
        println!("{}", "=".repeat(WIDTH));
        println!("{}", Self::centered(&style(title).cyan().bold().to_string()));
        println!("{}", "=".repeat(WIDTH));
    }

    pub fn subheader(&self, text: &str) {
        println!("{}", Self::centered(&style(text).cyan().to_string()));
    }

    pub fn separator(&self) {
        println!("\n{}", "-".repeat(WIDTH));
    }

    pub fn step(&self, number: usize, description: &str) {
        println!(
            "\n{}  {} {}",
            style("*").cyan(),
            style(format!("Step {number}:")).white().bold(),
            description
        );
    }

    pub fn success(&self, msg: &str) {
        println!("   {} {}", style("+").green().bold(), style(msg).green());
    }

    pub fn error(&self, msg: &str) {
        println!("   {} {}", style("x").red().bold(), style(msg).red());
    }

    pub fn info(&self, msg: &str) {
        println!("   {} {}", style("i").yellow(), msg);
    }

    pub fn warning(&self, msg: &str) {
        println!("   {} {}", style("!").yellow().bold(), style(msg).yellow());
    }

    pub fn plain(&self, msg: &str) {
        println!("{msg}");
    }

    pub fn centered_line(&self, msg: &str) {
        println!("{}", Self::centered(msg));
    }

    /// Prompt for a line of input. Blank input is allowed; callers apply
    /// their own defaults. The read runs on a blocking worker so it never
    /// parks an async worker thread.
    pub async fn prompt(&self, label: &str) -> anyhow::Result<String> {
        let label = label.to_string();
        tokio::task::spawn_blocking(move || -> anyhow::Result<String> {
            let value: String = Input::with_theme(&ColorfulTheme::default())
                .with_prompt(label)
                .allow_empty(true)
                .interact_text()?;
            Ok(value.trim().to_string())
        })
        .await?
    }

    /// Block until the user presses Enter. Used both for fatal-error exits
    /// (so a double-clicked launch doesn't vanish before the message is
    /// read) and for the closing summary.
    pub async fn pause(&self, msg: &str) {
        println!("\n{}", style(msg).cyan());
        let _ = tokio::task::spawn_blocking(|| {
            let mut line = String::new();
            std::io::stdin().read_line(&mut line)
        })
        .await;
    }

    /// A spinner for the cooperative download wait; the caller ticks it.
    pub fn spinner(&self, msg: &str) -> ProgressBar {
        let bar = ProgressBar::new_spinner();
        bar.set_message(msg.to_string());
        bar
    }
}

impl Default for Ui {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_centering_pads_short_text() {
        let centered = Ui::centered("abc");
        assert!(centered.ends_with("abc"));
        assert_eq!(centered.len(), (WIDTH - 3) / 2 + 3);
    }

    #[test]
    fn test_centering_leaves_wide_text_alone() {
        let wide = "w".repeat(WIDTH + 10);
        assert_eq!(Ui::centered(&wide), wide);
    }
}
