//! Terminal styling for `rsplc` output. With `--no-color` every helper
//! returns its input unchanged.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Palette {
    pub enabled: bool,
}

impl Palette {
    pub fn new(enabled: bool) -> Self {
        Self { enabled }
    }

    fn paint(self, sgr: &str, text: &str) -> String {
        if self.enabled {
            format!("\x1b[{}m{}\x1b[0m", sgr, text)
        } else {
            text.to_string()
        }
    }

    pub fn red(self, text: &str) -> String {
        self.paint("31", text)
    }

    pub fn green(self, text: &str) -> String {
        self.paint("32", text)
    }

    pub fn gray(self, text: &str) -> String {
        self.paint("90", text)
    }

    /// Status word right-aligned to 12 columns, bold green.
    pub fn status(self, label: &str) -> String {
        self.paint("1;32", &format!("{:>12}", label))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_palette_passes_text_through() {
        let plain = Palette::new(false);
        assert_eq!(plain.red("error:"), "error:");
        assert_eq!(plain.status("Writing"), "     Writing");
    }

    #[test]
    fn test_colored_palette_wraps_in_escapes() {
        let colored = Palette::new(true);
        assert_eq!(colored.green("ok"), "\x1b[32mok\x1b[0m");
        assert_eq!(colored.status("Compiling"), "\x1b[1;32m   Compiling\x1b[0m");
    }
}
