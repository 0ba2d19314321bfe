//! Startup banner: "TG-CONDUCTOR" in figlet's standard font with a purple-to-cyan gradient.

use crossterm::ExecutableCommand;
use crossterm::style::{Color, Print, ResetColor, SetForegroundColor};
use figlet_rs::FIGfont;
use std::io::{Write, stdout};

const TITLE: &str = "TG-CONDUCTOR";

const NEON_PURPLE: (u8, u8, u8) = (0xbc, 0x13, 0xfe);
const CYBER_CYAN: (u8, u8, u8) = (0x0f, 0xf0, 0xfc);

/// Linear interpolation between two RGB colors. `t` in [0.0, 1.0].
fn lerp_rgb(a: (u8, u8, u8), b: (u8, u8, u8), t: f64) -> (u8, u8, u8) {
    let mix = |x: u8, y: u8| (f64::from(x) * (1.0 - t) + f64::from(y) * t).round() as u8;
    (mix(a.0, b.0), mix(a.1, b.1), mix(a.2, b.2))
}

fn render_title() -> String {
    FIGfont::standard()
        .ok()
        .and_then(|font| font.convert(TITLE).map(|figure| figure.to_string()))
        .unwrap_or_else(|| TITLE.to_string())
}

/// Print the banner followed by the version and the address the API will listen on.
pub fn print_welcome(listen_addr: &str) {
    let mut out = stdout();
    let art = render_title();
    let lines: Vec<&str> = art.lines().filter(|l| !l.trim().is_empty()).collect();
    let steps = lines.len().saturating_sub(1).max(1);

    for (i, line) in lines.iter().enumerate() {
        let (r, g, b) = lerp_rgb(NEON_PURPLE, CYBER_CYAN, i as f64 / steps as f64);
        let _ = out.execute(SetForegroundColor(Color::Rgb { r, g, b }));
        let _ = out.execute(Print(format!("{}\r\n", line)));
    }

    let (r, g, b) = CYBER_CYAN;
    let _ = out.execute(SetForegroundColor(Color::Rgb { r, g, b }));
    let _ = out.execute(Print(format!(
        "v{}  API on http://{}/api\r\n",
        env!("CARGO_PKG_VERSION"),
        listen_addr
    )));
    let _ = out.execute(ResetColor);
    let _ = out.flush();
}
