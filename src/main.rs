// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

mod trie;
mod ucd;

use std::fmt::Write as FmtWrite;
use std::io::Write as IoWrite;
use std::path::PathBuf;

use anyhow::{Context, bail};
use indoc::writedoc;

use crate::ucd::WidthClass;

#[derive(Clone, Copy, Default)]
enum Language {
    #[default]
    C,
    Rust,
}

struct Output {
    arg_lang: Language,
    arg_block_size: Option<usize>,

    description: String,
    block_size: u32,
    covered: usize,
    blob: Vec<u8>,
}

impl Output {
    fn args(&self) -> String {
        let mut buf = String::new();
        match self.arg_lang {
            Language::C => buf.push_str("--lang=c"),
            Language::Rust => buf.push_str("--lang=rust"),
        }
        if let Some(block_size) = self.arg_block_size {
            _ = write!(buf, " --block-size={block_size}");
        }
        buf
    }
}

const HELP: &str = "\
Usage: codepoint-width-gen [options...] <ucd.nounihan.grouped.xml> [overrides...]
  -h, --help            Prints help information
  --lang=<c|rust>       Output language (default: c)
  --block-size=<n>      Trie block size, a power of two in [16, 256]
                        (default: search that range for the smallest table)

Additional UCD documents given after the first are applied in order as
override layers: their ranges win over whatever came before them.

Download ucd.nounihan.grouped.xml at:
  https://www.unicode.org/Public/UCD/latest/ucdxml/ucd.nounihan.grouped.zip
";

fn main() -> anyhow::Result<()> {
    let mut args = pico_args::Arguments::from_env();
    if args.contains(["-h", "--help"]) {
        eprint!("{HELP}");
        return Ok(());
    }

    let arg_lang = args
        .opt_value_from_fn("--lang", |arg| match arg {
            "c" => Ok(Language::C),
            "rust" => Ok(Language::Rust),
            l => bail!("invalid language: {:?}", l),
        })?
        .unwrap_or_default();
    let arg_block_size =
        args.opt_value_from_fn("--block-size", |arg| -> anyhow::Result<usize> {
            let n: usize = arg.parse()?;
            if !n.is_power_of_two() || !(16..=256).contains(&n) {
                bail!("block size must be a power of two in [16, 256]");
            }
            Ok(n)
        })?;

    let arg_inputs: Vec<PathBuf> = args.finish().into_iter().map(PathBuf::from).collect();
    if let Some(unknown) = arg_inputs.iter().find(|p| p.to_string_lossy().starts_with('-')) {
        bail!("unrecognized arguments: {:?}", unknown);
    }
    match arg_inputs.first() {
        Some(first) if first.to_string_lossy().ends_with("ucd.nounihan.grouped.xml") => {}
        Some(first) => bail!("the first input must be ucd.nounihan.grouped.xml, got {:?}", first),
        None => bail!("missing input files (see --help)"),
    }

    let inputs = arg_inputs
        .iter()
        .map(|path| {
            std::fs::read_to_string(path)
                .with_context(|| format!("failed to read {}", path.display()))
        })
        .collect::<anyhow::Result<Vec<_>>>()?;
    let xml = inputs
        .iter()
        .zip(&arg_inputs)
        .map(|(input, path)| {
            roxmltree::Document::parse(input)
                .with_context(|| format!("failed to parse {}", path.display()))
        })
        .collect::<anyhow::Result<Vec<_>>>()?;
    let documents = xml
        .iter()
        .map(ucd::Document::from_xml)
        .collect::<anyhow::Result<Vec<_>>>()?;

    let mapping = ucd::resolve(&documents)?;
    let trie = match arg_block_size {
        Some(block_size) => trie::build(&mapping, block_size)?,
        None => trie::build_best(&mapping, 4, 8)?,
    };

    // Run a quick sanity check to ensure that the trie works as expected.
    for (cp, expected) in mapping.iter().enumerate() {
        let expected = expected.unwrap_or(WidthClass::Narrow) as u8;
        assert_eq!(trie.get(cp as u32), expected, "trie sanity check failed for U+{cp:04X}");
    }

    let out = Output {
        arg_lang,
        arg_block_size,
        description: documents[0].description.clone(),
        block_size: trie.block_size(),
        covered: trie.covered(),
        blob: trie.serialize(),
    };

    let buf = match arg_lang {
        Language::C => generate_c(out),
        Language::Rust => generate_rust(out),
    };

    std::io::stdout().write_all(buf.as_bytes())?;
    Ok(())
}

fn generate_c(out: Output) -> String {
    let mut buf = String::new();

    _ = writedoc!(
        buf,
        "
        // BEGIN: Generated by codepoint-width-gen on {}, from {}, with {}
        // block size {}, {} codepoints covered, {} bytes
        // clang-format off
        static constexpr uint8_t s_codepointWidthTrie[{}] = {{",
        chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true),
        out.description,
        out.args(),
        out.block_size,
        out.covered,
        out.blob.len(),
        out.blob.len(),
    );
    write_bytes(&mut buf, &out.blob);
    buf.push_str("\n};\n// clang-format on\n// END: Generated by codepoint-width-gen\n");
    buf
}

fn generate_rust(out: Output) -> String {
    let mut buf = String::new();

    _ = writedoc!(
        buf,
        "
        // BEGIN: Generated by codepoint-width-gen on {}, from {}, with {}
        // block size {}, {} codepoints covered, {} bytes
        #[rustfmt::skip]
        pub const CODEPOINT_WIDTH_TRIE: [u8; {}] = [",
        chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true),
        out.description,
        out.args(),
        out.block_size,
        out.covered,
        out.blob.len(),
        out.blob.len(),
    );
    write_bytes(&mut buf, &out.blob);
    buf.push_str("\n];\n// END: Generated by codepoint-width-gen\n");
    buf
}

fn write_bytes(buf: &mut String, blob: &[u8]) {
    for (i, &byte) in blob.iter().enumerate() {
        if i % 16 == 0 {
            buf.push_str("\n   ");
        }
        _ = write!(buf, " 0x{byte:02x},");
    }
}
