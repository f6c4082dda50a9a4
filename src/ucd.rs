// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use anyhow::Context;
use thiserror::Error;

/// Number of Unicode code points, `[0, 0x10FFFF]`.
pub const CODEPOINTS: usize = 0x110000;

const NS: &str = "http://www.unicode.org/ns/2003/ucd/1.0";

/// The column-width category of a code point. `Ambiguous` is resolved to
/// either 1 or 2 columns by the terminal at display time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WidthClass {
    Narrow = 0,
    WideOrEmoji = 1,
    Ambiguous = 2,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ResolveError {
    #[error("invalid range U+{first:04X} to U+{last:04X}: first exceeds last")]
    InvalidRange { first: u32, last: u32 },
    #[error("code point U+{0:04X} is outside the Unicode range")]
    OutOfRange(u32),
}

/// The raw `ea`/`Emoji`/`EPres` attributes of a `<group>` or `<char>` node.
/// An empty string means the attribute was not asserted at this level,
/// same as in the UCD XML itself.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Attributes<'a> {
    pub east_asian: &'a str,
    pub emoji: &'a str,
    pub emoji_presentation: &'a str,
}

impl<'a> Attributes<'a> {
    fn extract(node: &roxmltree::Node<'a, '_>) -> Self {
        Self {
            east_asian: node.attribute("ea").unwrap_or(""),
            emoji: node.attribute("Emoji").unwrap_or(""),
            emoji_presentation: node.attribute("EPres").unwrap_or(""),
        }
    }

    /// Fills attributes this entry left unset from its enclosing group.
    /// Groups themselves have no further fallback.
    fn or_inherit(self, group: &Attributes<'a>) -> Self {
        let pick = |own: &'a str, fallback: &'a str| if own.is_empty() { fallback } else { own };
        Self {
            east_asian: pick(self.east_asian, group.east_asian),
            emoji: pick(self.emoji, group.emoji),
            emoji_presentation: pick(self.emoji_presentation, group.emoji_presentation),
        }
    }

    /// The emoji-presentation rule wins over the east-asian-width code:
    /// a fully qualified emoji occupies two columns even if its `ea` says
    /// ambiguous or neutral.
    fn width_class(&self) -> WidthClass {
        if self.emoji == "Y" && self.emoji_presentation == "Y" {
            WidthClass::WideOrEmoji
        } else {
            match self.east_asian {
                "F" | "W" => WidthClass::WideOrEmoji, // Full-width, Wide
                "A" => WidthClass::Ambiguous,         // Ambiguous
                _ => WidthClass::Narrow,              // Half-width, Narrow, Neutral, unset
            }
        }
    }
}

/// A single `<char>` entry, either one code point or an inclusive range.
#[derive(Debug, Clone, Copy)]
pub struct CharEntry<'a> {
    pub first: u32,
    pub last: u32,
    pub attributes: Attributes<'a>,
}

#[derive(Debug, Default)]
pub struct Group<'a> {
    pub attributes: Attributes<'a>,
    pub chars: Vec<CharEntry<'a>>,
}

/// One parsed UCD document. Documents are applied in input order and a later
/// document unconditionally overwrites whatever an earlier one asserted.
#[derive(Debug, Default)]
pub struct Document<'a> {
    pub description: String,
    pub groups: Vec<Group<'a>>,
}

impl<'a> Document<'a> {
    pub fn from_xml(doc: &'a roxmltree::Document) -> anyhow::Result<Self> {
        let root = doc.root_element();
        let description = root
            .children()
            .find(|n| n.has_tag_name((NS, "description")))
            .context("missing ucd description")?;
        let repertoire = root
            .children()
            .find(|n| n.has_tag_name((NS, "repertoire")))
            .context("missing ucd repertoire")?;
        let description = description.text().unwrap_or_default().to_string();

        let mut groups = Vec::new();
        for group in repertoire.children().filter(|n| n.has_tag_name((NS, "group"))) {
            let attributes = Attributes::extract(&group);
            let mut chars = Vec::new();

            for char in group.children().filter(|n| n.has_tag_name((NS, "char"))) {
                let (first, last) = extract_range(&char)?;
                chars.push(CharEntry { first, last, attributes: Attributes::extract(&char) });
            }

            groups.push(Group { attributes, chars });
        }

        Ok(Document { description, groups })
    }
}

fn extract_range(node: &roxmltree::Node) -> anyhow::Result<(u32, u32)> {
    let parse = |val: &str| {
        u32::from_str_radix(val, 16).with_context(|| format!("invalid code point {val:?}"))
    };
    match node.attribute("cp") {
        Some(val) => {
            let cp = parse(val)?;
            Ok((cp, cp))
        }
        None => {
            let first = node.attribute("first-cp").context("char without cp or first-cp")?;
            let last = node.attribute("last-cp").context("char without cp or last-cp")?;
            Ok((parse(first)?, parse(last)?))
        }
    }
}

/// One `Option<WidthClass>` per code point. `None` means no input document
/// asserted anything for that code point; the trie later treats it as narrow.
pub type DenseMapping = Vec<Option<WidthClass>>;

/// Resolves the given documents, in order, into a dense per-code-point
/// mapping. Last writer wins, across entries as well as across documents.
pub fn resolve(documents: &[Document]) -> Result<DenseMapping, ResolveError> {
    let mut mapping = vec![None; CODEPOINTS];

    for document in documents {
        for group in &document.groups {
            for entry in &group.chars {
                if entry.first > entry.last {
                    return Err(ResolveError::InvalidRange {
                        first: entry.first,
                        last: entry.last,
                    });
                }
                if entry.last as usize >= CODEPOINTS {
                    return Err(ResolveError::OutOfRange(entry.last));
                }

                let attributes = entry.attributes.or_inherit(&group.attributes);
                let value = attributes.width_class();
                mapping[entry.first as usize..=entry.last as usize].fill(Some(value));
            }
        }
    }

    Ok(mapping)
}

#[cfg(test)]
mod test {
    use super::*;

    fn entry(first: u32, last: u32, attributes: Attributes<'static>) -> CharEntry<'static> {
        CharEntry { first, last, attributes }
    }

    fn single_group(
        attributes: Attributes<'static>,
        chars: Vec<CharEntry<'static>>,
    ) -> Document<'static> {
        Document { description: String::new(), groups: vec![Group { attributes, chars }] }
    }

    #[test]
    fn test_later_document_overwrites_earlier() {
        let narrow = || {
            single_group(Attributes::default(), vec![entry(0x41, 0x41, Attributes::default())])
        };
        let ambiguous = || {
            single_group(
                Attributes::default(),
                vec![entry(0x41, 0x41, Attributes { east_asian: "A", ..Default::default() })],
            )
        };

        let mapping = resolve(&[narrow(), ambiguous()]).unwrap();
        assert_eq!(mapping[0x41], Some(WidthClass::Ambiguous));

        let mapping = resolve(&[ambiguous(), narrow()]).unwrap();
        assert_eq!(mapping[0x41], Some(WidthClass::Narrow));
    }

    #[test]
    fn test_entry_inherits_group_attributes() {
        let doc = single_group(
            Attributes { east_asian: "W", ..Default::default() },
            vec![
                entry(0x4E00, 0x4E00, Attributes::default()),
                entry(0x4E01, 0x4E01, Attributes { east_asian: "A", ..Default::default() }),
            ],
        );

        let mapping = resolve(&[doc]).unwrap();
        assert_eq!(mapping[0x4E00], Some(WidthClass::WideOrEmoji));
        assert_eq!(mapping[0x4E01], Some(WidthClass::Ambiguous));
    }

    #[test]
    fn test_emoji_presentation_beats_east_asian_width() {
        let doc = single_group(
            Attributes::default(),
            vec![
                entry(
                    0x2764,
                    0x2764,
                    Attributes { east_asian: "A", emoji: "Y", emoji_presentation: "Y" },
                ),
                // An emoji without default emoji presentation falls back to `ea`.
                entry(
                    0x263A,
                    0x263A,
                    Attributes { east_asian: "A", emoji: "Y", emoji_presentation: "" },
                ),
            ],
        );

        let mapping = resolve(&[doc]).unwrap();
        assert_eq!(mapping[0x2764], Some(WidthClass::WideOrEmoji));
        assert_eq!(mapping[0x263A], Some(WidthClass::Ambiguous));
    }

    #[test]
    fn test_untouched_code_points_stay_unset() {
        let doc = single_group(
            Attributes::default(),
            vec![entry(0x100, 0x1FF, Attributes { east_asian: "W", ..Default::default() })],
        );

        let mapping = resolve(&[doc]).unwrap();
        assert_eq!(mapping.len(), CODEPOINTS);
        assert_eq!(mapping[0xFF], None);
        assert_eq!(mapping[0x100], Some(WidthClass::WideOrEmoji));
        assert_eq!(mapping[0x1FF], Some(WidthClass::WideOrEmoji));
        assert_eq!(mapping[0x200], None);
    }

    #[test]
    fn test_reversed_range_fails() {
        let doc =
            single_group(Attributes::default(), vec![entry(0x45, 0x41, Attributes::default())]);
        assert_eq!(
            resolve(&[doc]),
            Err(ResolveError::InvalidRange { first: 0x45, last: 0x41 })
        );
    }

    #[test]
    fn test_out_of_range_code_point_fails() {
        let doc = single_group(
            Attributes::default(),
            vec![entry(0x110000, 0x110000, Attributes::default())],
        );
        assert_eq!(resolve(&[doc]), Err(ResolveError::OutOfRange(0x110000)));
    }

    #[test]
    fn test_from_xml() {
        let xml = r#"
            <ucd xmlns="http://www.unicode.org/ns/2003/ucd/1.0">
                <description>Unicode 16.0.0</description>
                <repertoire>
                    <group ea="W">
                        <char cp="4E00"/>
                        <char first-cp="4E01" last-cp="4E0F" ea="A"/>
                    </group>
                </repertoire>
            </ucd>
        "#;
        let xml = roxmltree::Document::parse(xml).unwrap();
        let doc = Document::from_xml(&xml).unwrap();

        assert_eq!(doc.description, "Unicode 16.0.0");
        assert_eq!(doc.groups.len(), 1);
        assert_eq!(doc.groups[0].attributes.east_asian, "W");
        assert_eq!(doc.groups[0].chars.len(), 2);
        assert_eq!(doc.groups[0].chars[0].first, 0x4E00);
        assert_eq!(doc.groups[0].chars[0].last, 0x4E00);
        assert_eq!(doc.groups[0].chars[1].first, 0x4E01);
        assert_eq!(doc.groups[0].chars[1].last, 0x4E0F);

        let mapping = resolve(&[doc]).unwrap();
        assert_eq!(mapping[0x4E00], Some(WidthClass::WideOrEmoji));
        assert_eq!(mapping[0x4E01], Some(WidthClass::Ambiguous));
        assert_eq!(mapping[0x4E10], None);
    }
}
