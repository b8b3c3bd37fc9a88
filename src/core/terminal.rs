use console::{Emoji, style};

pub static SUCCESS_ICON: Emoji<'_, '_> = Emoji("✅ ", "");
pub static INFO_ICON: Emoji<'_, '_> = Emoji("ℹ️  ", "");
pub static WARN_ICON: Emoji<'_, '_> = Emoji("⚠️  ", "");
pub static ERROR_ICON: Emoji<'_, '_> = Emoji("❌ ", "");
pub static GLOBE: Emoji<'_, '_> = Emoji("🌐 ", "");
pub static GEAR: Emoji<'_, '_> = Emoji("⚙️  ", "");
pub static PLUG: Emoji<'_, '_> = Emoji("🔌 ", "");

pub fn print_success(msg: &str) {
    println!("{} {}", SUCCESS_ICON, style(msg).green());
}

pub fn print_info(msg: &str) {
    println!("{} {}", INFO_ICON, style(msg).blue());
}

pub fn print_warn(msg: &str) {
    println!("{} {}", WARN_ICON, style(msg).yellow());
}

pub fn print_error(msg: &str) {
    eprintln!("{} {}", ERROR_ICON, style(msg).red().bold());
}

pub fn print_status(label: &str, msg: &str) {
    println!("  {} {}: {}", GEAR, style(label).bold().cyan(), msg);
}

pub fn print_link(label: &str, url: &str) {
    println!(
        "  {} {}: {}",
        GLOBE,
        style(label).bold(),
        style(url).underlined().cyan()
    );
}

/// One row of `plugin list`.
pub fn print_plugin(id: i64, package: &str, interval: u64, description: Option<&str>) {
    println!(
        "  {} {:>4}  {}  {}",
        PLUG,
        style(id).dim(),
        style(package).bold(),
        style(format!("every {}s", interval)).cyan()
    );
    if let Some(description) = description {
        println!("         {}", style(description).dim());
    }
}

pub fn print_banner() {
    println!();
    println!(
        "{} {}",
        style("plugboard").bold().magenta(),
        style(env!("CARGO_PKG_VERSION")).dim()
    );
    println!("{}", style("periodic plugin jobs with live logs").dim());
    println!();
}

pub fn print_goodbye() {
    println!("\n{}", style("plugboard stopped.").bold().cyan());
}

/// A titled block of help or status lines.
pub struct GuideSection {
    title: String,
    lines: Vec<String>,
}

impl GuideSection {
    pub fn new(title: &str) -> Self {
        Self {
            title: title.to_string(),
            lines: Vec::new(),
        }
    }

    pub fn command(mut self, name: &str, description: &str) -> Self {
        self.lines.push(format!(
            "{} {}",
            style(format!("{:<28}", name)).green(),
            description
        ));
        self
    }

    pub fn status(mut self, label: &str, value: &str) -> Self {
        self.lines.push(format!("{}: {}", style(label).bold(), value));
        self
    }

    pub fn text(mut self, line: &str) -> Self {
        self.lines.push(line.to_string());
        self
    }

    pub fn blank(mut self) -> Self {
        self.lines.push(String::new());
        self
    }

    pub fn print(&self) {
        println!(" {}", style(&self.title).bold().magenta());
        for line in &self.lines {
            if line.is_empty() {
                println!();
            } else {
                println!("   {}", line);
            }
        }
        println!();
    }
}
