use assert_matches::assert_matches;
use serde_json::json;

use dex_cache::domain::{EntityId, NameRecord};
use dex_cache::error::DexError;
use dex_cache::species::{canonical_cache_from_list, extract_name_record};

fn id(value: u16) -> EntityId {
    EntityId::new(value).unwrap()
}

#[test]
fn extracts_localized_name_for_locale() {
    let raw = json!({
        "name": "bulbasaur",
        "names": [
            { "name": "Bulbasaur", "language": { "name": "en" } },
            { "name": "Bisasam", "language": { "name": "de" } },
            { "name": "Bulbizarre", "language": { "name": "fr" } }
        ]
    });

    let record = extract_name_record(&raw, "de").unwrap();
    assert_eq!(record, NameRecord::new("Bisasam", "bulbasaur"));

    let record = extract_name_record(&raw, "fr").unwrap();
    assert_eq!(record.localized, "Bulbizarre");
}

#[test]
fn falls_back_to_canonical_without_locale_entry() {
    let raw = json!({
        "name": "bulbasaur",
        "names": [{ "name": "Bulbasaur", "language": { "name": "en" } }]
    });
    let record = extract_name_record(&raw, "de").unwrap();
    assert_eq!(record, NameRecord::new("bulbasaur", "bulbasaur"));

    let record = extract_name_record(&json!({ "name": "mew" }), "de").unwrap();
    assert_eq!(record, NameRecord::new("mew", "mew"));
}

#[test]
fn payload_without_name_is_a_parse_error() {
    let raw = json!({ "names": [] });
    assert_matches!(extract_name_record(&raw, "de"), Err(DexError::Parse(_)));
}

#[test]
fn bulk_list_builds_placeholders_in_order() {
    let raw = json!({
        "count": 3,
        "results": [
            { "name": "bulbasaur", "url": "https://example.test/1/" },
            { "name": "ivysaur", "url": "https://example.test/2/" },
            { "name": "venusaur", "url": "https://example.test/3/" }
        ]
    });

    let cache = canonical_cache_from_list(&raw, 3).unwrap();

    assert_eq!(cache.len(), 3);
    assert_eq!(cache.get(id(1)), Some(&NameRecord::new("#0001", "bulbasaur")));
    assert_eq!(cache.get(id(2)), Some(&NameRecord::new("#0002", "ivysaur")));
    assert_eq!(cache.get(id(3)), Some(&NameRecord::new("#0003", "venusaur")));
    assert!(cache.iter().all(|(_, record)| record.is_placeholder()));
}

#[test]
fn bulk_list_discards_entries_beyond_max_id() {
    let raw = json!({
        "results": [
            { "name": "bulbasaur" },
            { "name": "ivysaur" },
            { "name": "venusaur" }
        ]
    });

    let cache = canonical_cache_from_list(&raw, 2).unwrap();
    assert_eq!(cache.len(), 2);
    assert!(!cache.contains(id(3)));
}

#[test]
fn bulk_list_without_results_is_a_parse_error() {
    assert_matches!(
        canonical_cache_from_list(&json!({ "detail": "nope" }), 3),
        Err(DexError::Parse(_))
    );
}
