//! Record extraction from rendered search result pages.
//!
//! Result cards are found by text structure rather than class names: every
//! `<strong>` mentioning the record number marker anchors a card, the card is
//! the nearest ancestor that also carries the identifier label, and fields are
//! read from `<span><strong>Label:</strong> value</span>` pairs inside it. An
//! ancestor holding a second marker belongs to a list of cards, never to one.

use std::sync::LazyLock;

use scraper::{ElementRef, Html, Selector};

use crate::models::SearchResultItem;

const NUMBER_MARKER: &str = "Ata nº";
const IDENTIFIER_LABEL: &str = "Id ata PNCP:";
const ORGAN_LABEL: &str = "Órgão:";
const SUBJECT_LABEL: &str = "Objeto:";

static STRONG: LazyLock<Selector> = LazyLock::new(|| Selector::parse("strong").unwrap());
static SPAN: LazyLock<Selector> = LazyLock::new(|| Selector::parse("span").unwrap());

/// Extract every record card from a rendered page, in document order.
///
/// Cards without an identifier are skipped.
pub fn extract_records(html: &str) -> Vec<SearchResultItem> {
    let document = Html::parse_document(html);

    document
        .select(&STRONG)
        .filter(is_marker)
        .filter_map(|marker| {
            let card = find_card(marker)?;
            let identifier = labeled_value(card, IDENTIFIER_LABEL)?;
            let display_number = text_of(&marker).replacen(NUMBER_MARKER, "", 1);
            Some(SearchResultItem::new(
                identifier,
                display_number,
                labeled_value(card, ORGAN_LABEL),
                labeled_value(card, SUBJECT_LABEL),
            ))
        })
        .collect()
}

fn text_of(element: &ElementRef<'_>) -> String {
    element.text().collect()
}

fn is_marker(strong: &ElementRef<'_>) -> bool {
    text_of(strong).contains(NUMBER_MARKER)
}

/// Nearest ancestor of `marker` that contains the identifier label.
///
/// The walk gives up at the first ancestor that also holds another card's
/// marker: a card without its own identifier has none.
fn find_card(marker: ElementRef<'_>) -> Option<ElementRef<'_>> {
    for el in marker.ancestors().filter_map(ElementRef::wrap) {
        if matches!(el.value().name(), "body" | "html") {
            return None;
        }
        if el.select(&STRONG).filter(is_marker).nth(1).is_some() {
            return None;
        }
        if text_of(&el).contains(IDENTIFIER_LABEL) {
            return Some(el);
        }
    }
    None
}

/// Value of the first span in `card` whose `<strong>` is exactly `label`.
fn labeled_value(card: ElementRef<'_>, label: &str) -> Option<String> {
    let span = card.select(&SPAN).find(|span| {
        span.select(&STRONG)
            .next()
            .is_some_and(|strong| text_of(&strong).trim() == label)
    })?;

    let value = text_of(&span).trim().replacen(label, "", 1).trim().to_string();
    (!value.is_empty()).then_some(value)
}
