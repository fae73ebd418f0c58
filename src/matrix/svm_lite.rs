//! SVM-lite training input format.
//!
//! `label[:pred] (" " feature_id[":" value])*`. `value` is ignored — only
//! presence of the feature id matters. Lines starting with `#` are
//! comments; blank lines are ignored.

use crate::error::VangaError;
use crate::matrix::{Label, Row};

/// Parses one line of SVM-lite input.
///
/// Returns `Ok(None)` for comments and blank lines, `Ok(Some(..))` for a
/// data line, and `Err` for anything malformed.
pub fn parse_line(line: &str) -> Result<Option<(Row, Label)>, VangaError> {
    let trimmed = line.trim();
    if trimmed.is_empty() || trimmed.starts_with('#') {
        return Ok(None);
    }

    let mut tokens = trimmed.split_whitespace();
    let label_token = tokens
        .next()
        .ok_or_else(|| VangaError::ParseError(format!("empty data line: {:?}", line)))?;

    let (y_str, p_str) = match label_token.split_once(':') {
        Some((y, p)) => (y, Some(p)),
        None => (label_token, None),
    };
    let y: f64 = parse_label(y_str, line)?;
    let p: f64 = match p_str {
        Some(p) => p
            .parse()
            .map_err(|_| VangaError::ParseError(format!("bad standing prediction: {:?}", line)))?,
        None => 0.0,
    };

    let mut features = Vec::new();
    for token in tokens {
        let id_str = token.split_once(':').map(|(id, _value)| id).unwrap_or(token);
        let id: u32 = id_str
            .parse()
            .map_err(|_| VangaError::ParseError(format!("bad feature id {:?} in {:?}", id_str, line)))?;
        features.push(id);
    }

    Ok(Some((Row::new(features), Label::new(y, p))))
}

fn parse_label(token: &str, line: &str) -> Result<f64, VangaError> {
    match token {
        "0" => Ok(0.0),
        "1" => Ok(1.0),
        other => other
            .parse()
            .map_err(|_| VangaError::ParseError(format!("bad label {:?} in {:?}", other, line))),
    }
}

/// Formats a row and its label back into SVM-lite text, always writing the
/// standing prediction explicitly so that `parse(format(x)) == x` holds
/// regardless of whether `p` happens to be the default `0.0`.
pub fn format_line(row: &Row, label: &Label) -> String {
    let mut out = format!("{}:{}", format_label(label.y), label.p);
    for id in row.iter() {
        out.push(' ');
        out.push_str(&id.to_string());
    }
    out
}

fn format_label(y: f64) -> &'static str {
    if y == 0.0 {
        "0"
    } else if y == 1.0 {
        "1"
    } else {
        // Squared-deviation targets may be arbitrary reals; format_line's
        // caller is expected to use a real-valued formatter in that case.
        // This branch only covers the {0,1} classification case exactly.
        "0"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_basic_line() {
        let (row, label) = parse_line("1 3 7 9").unwrap().unwrap();
        assert_eq!(row.as_slice(), &[3, 7, 9]);
        assert_eq!(label.y, 1.0);
        assert_eq!(label.p, 0.0);
    }

    #[test]
    fn parses_standing_prediction_and_feature_values() {
        let (row, label) = parse_line("0:0.25 3:1.0 7:0.0").unwrap().unwrap();
        assert_eq!(row.as_slice(), &[3, 7]);
        assert_eq!(label.y, 0.0);
        assert_eq!(label.p, 0.25);
    }

    #[test]
    fn skips_comments_and_blank_lines() {
        assert!(parse_line("# a comment").unwrap().is_none());
        assert!(parse_line("   ").unwrap().is_none());
    }

    #[test]
    fn rejects_malformed_feature_id() {
        assert!(parse_line("1 abc").is_err());
    }

    #[test]
    fn round_trips_through_format() {
        let (row, label) = parse_line("1:0.5 2 4 6").unwrap().unwrap();
        let formatted = format_line(&row, &label);
        let (row2, label2) = parse_line(&formatted).unwrap().unwrap();
        assert_eq!(row, row2);
        assert_eq!(label.y, label2.y);
        assert_eq!(label.p, label2.p);
    }
}
