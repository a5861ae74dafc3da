pub mod block;
pub mod config;
pub mod counter;
pub mod crypto;
pub mod fork;
pub mod message;
pub mod network;
pub mod rpc;
pub mod serializer;
pub mod stats;
pub mod time;
pub mod wire;

pub mod tokio;

#[cfg(feature = "clap")]
// If the clap feature is enabled, build the shared style set for CLIs
pub fn get_cli_styles() -> clap::builder::Styles {
    use clap::builder::styling::*;

    clap::builder::Styles::styled()
        .usage(
            Style::new()
                .bold()
                .fg_color(Some(Color::Ansi(AnsiColor::Yellow))),
        )
        .header(
            Style::new()
                .bold()
                .fg_color(Some(Color::Ansi(AnsiColor::Yellow))),
        )
        .literal(Style::new().fg_color(Some(Color::Ansi(AnsiColor::Green))))
        .invalid(
            Style::new()
                .bold()
                .fg_color(Some(Color::Ansi(AnsiColor::Red))),
        )
        .error(
            Style::new()
                .bold()
                .fg_color(Some(Color::Ansi(AnsiColor::Red))),
        )
}
