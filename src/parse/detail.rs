//! GPU detail pages.
//!
//! Multi-chip boards (dual/quad GPU cards) list per-chip figures on the
//! site. Those are scaled to whole-board values for the memory, render
//! config and theoretical performance sections.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::{Captures, Regex};
use scraper::{ElementRef, Html, Selector};
use url::Url;

use super::{absolutize, collect_key_values, compact_text, normalize_title, spaced_text};
use crate::models::{DetailRecord, SpecFields};

const REQUIRED_SECTIONS: &[&str] = &[
    "Graphics Processor",
    "Clock Speeds",
    "Memory",
    "Board Design",
    "Render Config",
    "Theoretical Performance",
    "Graphics Features",
    "IGP Variants",
    "Mobile Graphics",
    "Graphics Card",
    "Integrated Graphics",
];

const MULTI_CHIP_TITLE_HINTS: &[(&str, u32)] = &[("geforce gtx 690", 2), ("b300", 4)];

const PROBE_KEYS: &[&str] = &[
    "gpu name",
    "graphics processor",
    "gpu",
    "chip",
    "multi-gpu",
    "gpu count",
];

const SCALED_SECTIONS: &[&str] = &["memory", "render config", "theoretical performance"];

static MULTI_GPU_HINT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)multi\s*-?\s*gpu|dual\s*-?\s*gpu|quad\s*-?\s*gpu").unwrap());

static CHIP_COUNT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)(?:\bx\s*(\d+)\b|\b(\d+)\s*gpu\b)").unwrap());

static MULTIGPU_CLASS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)multigpu-x(\d+)").unwrap());

// Grouped thousands first so "1,234" is one token rather than "1" and "234".
static NUMBER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\d{1,3}(?:,\d{3})+(?:\.\d+)?|\d+(?:\.\d+)?").unwrap());

static MAIN_H1: LazyLock<Selector> = LazyLock::new(|| Selector::parse("main h1").unwrap());
static H1: LazyLock<Selector> = LazyLock::new(|| Selector::parse("h1").unwrap());
static IMG: LazyLock<Selector> = LazyLock::new(|| Selector::parse("img").unwrap());

static HERO_BLOCKS: LazyLock<Vec<Selector>> = LazyLock::new(|| {
    ["div.gpu-specs__summary", "div#specs", "section:first-of-type"]
        .into_iter()
        .map(|css| Selector::parse(css).unwrap())
        .collect()
});

static SECTION_HEADINGS: LazyLock<Selector> = LazyLock::new(|| {
    Selector::parse("main h2, main h3, main h4, h2.section, h3.section, h4.section").unwrap()
});

static LOOSE_HEADINGS: LazyLock<Selector> = LazyLock::new(|| Selector::parse("h2, h3, h4, h5, strong").unwrap());

static MULTIGPU_NODES: LazyLock<Selector> = LazyLock::new(|| Selector::parse("dd.multigpu, td.multigpu").unwrap());

/// Parse a detail page into a record. Provenance is left unset; the caller
/// stamps it after a successful fetch.
pub fn parse_detail_document(html: &str, url: &str, base: &Url) -> DetailRecord {
    let document = Html::parse_document(html);

    let title = document
        .select(&MAIN_H1)
        .next()
        .or_else(|| document.select(&H1).next())
        .map(compact_text)
        .filter(|t| !t.is_empty())
        .unwrap_or_else(|| url.to_string());

    let hero = HERO_BLOCKS
        .iter()
        .find_map(|sel| document.select(sel).next())
        .map(collect_key_values)
        .unwrap_or_default();

    let mut sections = collect_sections(&document);
    let multiplier = detect_multi_chip_multiplier(&document, &title, url, &hero, &sections);
    if multiplier > 1 {
        sections = apply_multi_chip_multiplier(sections, multiplier);
    }

    let images = document
        .select(&IMG)
        .filter_map(|el| el.value().attr("src"))
        .filter(|src| src.contains("gpu-specs") || src.contains("images-new"))
        .filter_map(|src| absolutize(base, src))
        .collect();

    DetailRecord {
        url: url.to_string(),
        title,
        hero,
        sections,
        images,
        fetched_via: Default::default(),
        fetched_at: None,
    }
}

/// Sections keyed by heading text. Headings that differ only in case or
/// spacing are merged into the first one seen; the first value for a key wins.
#[derive(Default)]
struct SectionSet {
    sections: BTreeMap<String, SpecFields>,
    titles: BTreeMap<String, String>,
}

impl SectionSet {
    fn has(&self, norm: &str) -> bool {
        self.titles.contains_key(norm)
    }

    fn upsert(&mut self, title: &str, data: SpecFields) {
        let norm = normalize_title(title);
        if norm.is_empty() || data.is_empty() {
            return;
        }
        if let Some(existing) = self.titles.get(&norm) {
            if let Some(target) = self.sections.get_mut(existing) {
                merge_missing(target, data);
            }
            return;
        }
        self.titles.insert(norm, title.to_string());
        self.sections.insert(title.to_string(), data);
    }
}

fn merge_missing(target: &mut SpecFields, source: SpecFields) {
    for (key, value) in source {
        if !key.is_empty() && !value.is_empty() {
            target.entry(key).or_insert(value);
        }
    }
}

/// The first table, dl or div following `heading` before the next heading
/// of the same level.
fn find_section_block(heading: ElementRef<'_>) -> Option<ElementRef<'_>> {
    let level = heading.value().name();
    for sibling in heading.next_siblings().filter_map(ElementRef::wrap) {
        let name = sibling.value().name();
        if name == level {
            return None;
        }
        if matches!(name, "table" | "dl" | "div") {
            return Some(sibling);
        }
    }
    None
}

fn section_data(heading: ElementRef<'_>) -> SpecFields {
    let mut data = SpecFields::new();
    if let Some(parent) = heading.parent().and_then(ElementRef::wrap) {
        merge_missing(&mut data, collect_key_values(parent));
    }
    if let Some(block) = find_section_block(heading) {
        merge_missing(&mut data, collect_key_values(block));
    }
    data
}

fn collect_sections(document: &Html) -> BTreeMap<String, SpecFields> {
    let mut set = SectionSet::default();

    for heading in document.select(&SECTION_HEADINGS) {
        let title = spaced_text(heading);
        set.upsert(&title, section_data(heading));
    }

    // Some layouts put required sections under plain <strong> or <h5> labels.
    for required in REQUIRED_SECTIONS {
        let norm = normalize_title(required);
        if set.has(&norm) {
            continue;
        }
        let Some(heading) = document
            .select(&LOOSE_HEADINGS)
            .find(|el| normalize_title(&spaced_text(*el)).contains(&norm))
        else {
            continue;
        };
        set.upsert(required, section_data(heading));
    }

    set.sections
}

fn detect_multi_chip_multiplier(
    document: &Html,
    title: &str,
    url: &str,
    hero: &SpecFields,
    sections: &BTreeMap<String, SpecFields>,
) -> u32 {
    let from_classes = multiplier_from_classes(document);
    if from_classes > 1 {
        return from_classes;
    }

    let title_norm = normalize_title(title);
    let url_norm = normalize_title(url);
    for (hint, multiplier) in MULTI_CHIP_TITLE_HINTS {
        if title_norm.contains(hint) || url_norm.contains(hint) {
            return *multiplier;
        }
    }

    let is_probe_key = |key: &str| PROBE_KEYS.contains(&normalize_title(key).as_str());
    let mut probes: Vec<&str> = vec![title];
    probes.extend(hero.iter().filter(|(k, _)| is_probe_key(k)).map(|(_, v)| v.as_str()));
    for (name, items) in sections {
        if normalize_title(name).contains("graphics processor") {
            probes.extend(items.values().map(String::as_str));
        }
        probes.extend(items.iter().filter(|(k, _)| is_probe_key(k)).map(|(_, v)| v.as_str()));
    }

    let mut multiplier = 1;
    for text in probes {
        if !MULTI_GPU_HINT.is_match(text) {
            continue;
        }
        for caps in CHIP_COUNT.captures_iter(text) {
            for group in [1, 2] {
                if let Some(value) = caps.get(group).and_then(|m| m.as_str().parse::<u32>().ok()) {
                    if (2..=8).contains(&value) {
                        multiplier = multiplier.max(value);
                    }
                }
            }
        }
    }
    multiplier
}

fn multiplier_from_classes(document: &Html) -> u32 {
    let mut multiplier = 1;
    for node in document.select(&MULTIGPU_NODES) {
        for class in node.value().classes() {
            let Some(value) = MULTIGPU_CLASS
                .captures(class)
                .and_then(|c| c.get(1))
                .and_then(|m| m.as_str().parse::<u32>().ok())
            else {
                continue;
            };
            if (2..=8).contains(&value) {
                multiplier = multiplier.max(value);
            }
        }
    }
    multiplier
}

fn apply_multi_chip_multiplier(
    sections: BTreeMap<String, SpecFields>,
    multiplier: u32,
) -> BTreeMap<String, SpecFields> {
    sections
        .into_iter()
        .map(|(name, items)| {
            let norm = normalize_title(&name);
            if !SCALED_SECTIONS.contains(&norm.as_str()) {
                return (name, items);
            }
            let scaled = items
                .into_iter()
                .map(|(key, value)| {
                    // memory clocks are per chip and stay as listed
                    if norm == "memory" && normalize_title(&key).contains("clock") {
                        (key, value)
                    } else {
                        let value = multiply_value_numbers(&value, multiplier);
                        (key, value)
                    }
                })
                .collect();
            (name, scaled)
        })
        .collect()
}

/// Multiply every number in `value`. Integers keep thousands separators;
/// decimals are printed with up to four fractional digits.
pub fn multiply_value_numbers(value: &str, multiplier: u32) -> String {
    NUMBER
        .replace_all(value, |caps: &Captures<'_>| {
            let token = &caps[0];
            let plain = token.replace(',', "");
            if plain.contains('.') {
                match plain.parse::<f64>() {
                    Ok(number) => format_decimal(number * f64::from(multiplier)),
                    Err(_) => token.to_string(),
                }
            } else {
                match plain
                    .parse::<u64>()
                    .ok()
                    .and_then(|n| n.checked_mul(u64::from(multiplier)))
                {
                    Some(n) => group_thousands(n),
                    None => token.to_string(),
                }
            }
        })
        .into_owned()
}

fn format_decimal(value: f64) -> String {
    let text = format!("{:.4}", value);
    text.trim_end_matches('0').trim_end_matches('.').to_string()
}

fn group_thousands(n: u64) -> String {
    let digits = n.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(ch);
    }
    out
}
