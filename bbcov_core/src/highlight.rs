use crate::query::{LineClass, LineClassification};
use crate::source::SourceLine;

const GREEN: &str = "\x1b[92m";
const RED: &str = "\x1b[91m";
const YELLOW: &str = "\x1b[93m";
const RESET: &str = "\x1b[0m";

impl LineClass {
    /// ANSI color used when rendering a line of this class, if any.
    pub fn ansi_color(self) -> Option<&'static str> {
        match self {
            LineClass::Covered => Some(GREEN),
            LineClass::Uncovered => Some(RED),
            LineClass::Mixed => Some(YELLOW),
            LineClass::Unknown => None,
        }
    }
}

/// Renders `sources` as `"<line>:\t<text>"` rows colored by `classes`.
pub fn highlight(classes: &LineClassification, sources: &[SourceLine]) -> String {
    let mut out = String::new();
    for src in sources {
        let text = src.text.trim_end_matches(['\r', '\n']);
        let row = format!("{}:\t{text}", src.line);
        match classes.class_of(src.line).ansi_color() {
            Some(color) => {
                out.push_str(color);
                out.push_str(&row);
                out.push_str(RESET);
            }
            None => out.push_str(&row),
        }
        out.push('\n');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::FunctionKey;
    use crate::model::tests::{parse_model, profile};
    use std::path::PathBuf;

    fn src(line: u32, text: &str) -> SourceLine {
        SourceLine {
            text: text.to_string(),
            line,
            file: PathBuf::from("parse.c"),
        }
    }

    #[test]
    fn colors_each_class() {
        let mut model = parse_model();
        model.merge(&profile(&[1, 0]), "seedA").unwrap();
        let classes = model
            .classify(&FunctionKey::new("parse", "parse.c"))
            .unwrap();

        let out = highlight(
            &classes,
            &[
                src(9, "int parse() {"),
                src(10, "  a();"),
                src(11, "  if (x)"),
                src(12, "    b();"),
            ],
        );
        let rows: Vec<&str> = out.lines().collect();
        assert_eq!(rows[0], "9:\tint parse() {");
        assert_eq!(rows[1], "\x1b[92m10:\t  a();\x1b[0m");
        assert_eq!(rows[2], "\x1b[93m11:\t  if (x)\x1b[0m");
        assert_eq!(rows[3], "\x1b[91m12:\t    b();\x1b[0m");
    }
}
