//! Tree file text format.
//!
//! ```text
//! <tree> := "d" <delta>                      ; leaf
//!         | "s" <feature_id> <tree> <tree>   ; split: yes-child, no-child
//! ```
//!
//! Whitespace-separated ASCII tokens on a single line terminated by `\n`. A
//! file may concatenate multiple trees separated by `\n`; a leading magic
//! line `"VANGA-TREE 1"` is required on the first tree.

use std::io::{BufRead, Write};

use crate::error::VangaError;
use crate::tree::Tree;

const MAGIC: &str = "VANGA-TREE 1";

/// Writes `trees` to `out`, prefixed by the magic line.
pub fn save<W: Write>(out: &mut W, trees: &[Tree]) -> Result<(), VangaError> {
    writeln!(out, "{MAGIC}").map_err(|e| VangaError::IO(e.to_string()))?;
    for tree in trees {
        let mut tokens = Vec::new();
        encode_tree(tree, &mut tokens);
        writeln!(out, "{}", tokens.join(" ")).map_err(|e| VangaError::IO(e.to_string()))?;
    }
    Ok(())
}

fn encode_tree(tree: &Tree, tokens: &mut Vec<String>) {
    match tree {
        Tree::Leaf(delta) => {
            tokens.push("d".to_string());
            tokens.push(format!("{delta:.7e}"));
        }
        Tree::Split {
            feature_id,
            yes,
            no,
        } => {
            tokens.push("s".to_string());
            tokens.push(feature_id.to_string());
            encode_tree(yes, tokens);
            encode_tree(no, tokens);
        }
    }
}

/// Reads every tree from `input`, requiring the magic line first.
pub fn load<R: BufRead>(input: &mut R) -> Result<Vec<Tree>, VangaError> {
    let mut lines = input.lines();
    let magic = lines
        .next()
        .ok_or_else(|| VangaError::ParseError("empty tree file".into()))?
        .map_err(|e| VangaError::ParseError(e.to_string()))?;
    if magic.trim() != MAGIC {
        return Err(VangaError::ParseError(format!(
            "expected magic line {MAGIC:?}, found {magic:?}"
        )));
    }

    let mut trees = Vec::new();
    for line in lines {
        let line = line.map_err(|e| VangaError::ParseError(e.to_string()))?;
        if line.trim().is_empty() {
            continue;
        }
        let mut tokens = line.split_whitespace();
        let tree = decode_tree(&mut tokens)?;
        trees.push(tree);
    }
    Ok(trees)
}

fn decode_tree<'a>(tokens: &mut impl Iterator<Item = &'a str>) -> Result<Tree, VangaError> {
    let tag = tokens
        .next()
        .ok_or_else(|| VangaError::ParseError("truncated tree".into()))?;
    match tag {
        "d" => {
            let delta: f64 = tokens
                .next()
                .ok_or_else(|| VangaError::ParseError("missing leaf delta".into()))?
                .parse()
                .map_err(|e| VangaError::ParseError(format!("bad delta: {e}")))?;
            Ok(Tree::leaf(delta))
        }
        "s" => {
            let feature_id: u32 = tokens
                .next()
                .ok_or_else(|| VangaError::ParseError("missing feature id".into()))?
                .parse()
                .map_err(|e| VangaError::ParseError(format!("bad feature id: {e}")))?;
            let yes = decode_tree(tokens)?;
            let no = decode_tree(tokens)?;
            Ok(Tree::split(feature_id, yes, no))
        }
        other => Err(VangaError::ParseError(format!(
            "unknown tree token {other:?}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn round_trips_a_split_tree() {
        let tree = Tree::split(3, Tree::leaf(0.5), Tree::leaf(-0.25));
        let mut buf = Vec::new();
        save(&mut buf, std::slice::from_ref(&tree)).unwrap();
        let mut cursor = Cursor::new(buf);
        let loaded = load(&mut cursor).unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].predict_fast(&crate::tree::PresenceTable::from_row(
            &crate::matrix::Row::new(vec![3]),
            4
        )), 0.5);
    }

    #[test]
    fn rejects_missing_magic_line() {
        let mut cursor = Cursor::new(b"d 1.0\n".to_vec());
        assert!(load(&mut cursor).is_err());
    }

    #[test]
    fn concatenates_multiple_trees() {
        let trees = vec![Tree::leaf(1.0), Tree::leaf(2.0)];
        let mut buf = Vec::new();
        save(&mut buf, &trees).unwrap();
        let mut cursor = Cursor::new(buf);
        let loaded = load(&mut cursor).unwrap();
        assert_eq!(loaded.len(), 2);
    }
}
