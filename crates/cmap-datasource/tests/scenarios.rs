use std::path::Path;
use std::sync::Arc;

use cmap_datasource::{
    AttributeKind, AttributeType, AttributeValue, CacheWarmingConfig, ChannelContext, ContentId,
    ContentObject, Datasource, DatasourceConfig, DatasourceError, Expression, Paging,
    RefreshOutcome, Schema, SyncCheckingConfig, MISSING, ROOT_CHANNEL,
};
use cmap_store::{InMemoryBackend, RowValue, Statement};

const PAGE: i32 = 1;
const AUTHOR: i32 = 2;

fn schema() -> Schema {
    Schema::new([
        AttributeType::new(PAGE, "name", AttributeKind::Text).optimized(),
        AttributeType::new(PAGE, "keywords", AttributeKind::Text).multivalue(),
        AttributeType::new(PAGE, "summary", AttributeKind::LongText),
        AttributeType::new(PAGE, "rank", AttributeKind::Integer),
        AttributeType::new(PAGE, "author", AttributeKind::Link).linking(AUTHOR),
        AttributeType::new(AUTHOR, "name", AttributeKind::Text),
        AttributeType::new(AUTHOR, "pages", AttributeKind::Link).foreign(PAGE, "author"),
        AttributeType::new(AUTHOR, "photo", AttributeKind::Binary).filesystem(),
    ])
    .unwrap()
}

struct Fixture {
    backend: Arc<InMemoryBackend>,
    ds: Datasource,
}

/// Channels: master (1) with the localized child de (2).
fn fixture_with(config: DatasourceConfig) -> Fixture {
    let backend = Arc::new(InMemoryBackend::new("content"));
    let ds = Datasource::new(backend.clone(), schema(), config).unwrap();
    ds.update_channels(|tree| {
        tree.add_channel(ROOT_CHANNEL, 1, "master")?;
        tree.add_channel(1, 2, "de")
    })
    .unwrap();
    Fixture { backend, ds }
}

fn fixture() -> Fixture {
    fixture_with(DatasourceConfig::default())
}

fn master() -> ChannelContext {
    ChannelContext::new([1])
}

fn de() -> ChannelContext {
    ChannelContext::new([2])
}

/// Channelset 42: "1.100" in master, localized as "1.200" in de.
fn localized(f: &Fixture) -> (ContentObject, ContentObject) {
    let mut home = ContentObject::new(ContentId::new(PAGE, 100))
        .in_channel(1)
        .with_channelset(42)
        .with("name", "Home");
    f.ds.insert(&master(), &mut home).unwrap();
    let mut startseite = ContentObject::new(ContentId::new(PAGE, 200))
        .in_channel(2)
        .with_channelset(42)
        .with("name", "Startseite");
    f.ds.insert(&de(), &mut startseite).unwrap();
    (home, startseite)
}

fn page(f: &Fixture, obj_id: i64, keywords: &[&str]) -> ContentObject {
    let mut page = ContentObject::new(ContentId::new(PAGE, obj_id))
        .with("name", format!("page {obj_id}"))
        .with("summary", "A longer description");
    page.set(
        "keywords",
        keywords.iter().map(|&k| AttributeValue::from(k)).collect(),
    );
    f.ds.insert(&master(), &mut page).unwrap();
    page
}

fn texts(values: &[&str]) -> Vec<AttributeValue> {
    values.iter().map(|&v| AttributeValue::from(v)).collect()
}

fn fresh(f: &Fixture, object: &ContentObject) -> ContentObject {
    f.ds.object_by_id(object.internal_id).unwrap().unwrap()
}

fn count_files(dir: &Path) -> usize {
    std::fs::read_dir(dir)
        .unwrap()
        .map(|entry| {
            let path = entry.unwrap().path();
            if path.is_dir() {
                count_files(&path)
            } else {
                1
            }
        })
        .sum()
}

// =========================================================================
// Resolution
// =========================================================================

#[test]
fn channelset_resolves_to_most_specific_variant() {
    let f = fixture();
    localized(&f);

    let object = f.ds.object_by_channelset(&de(), 42, None).unwrap().unwrap();
    assert_eq!(object.content_id.to_string(), "1.200");
    assert_eq!(object.channel_id, 2);

    let object = f.ds.object_by_channelset(&master(), 42, None).unwrap().unwrap();
    assert_eq!(object.content_id.to_string(), "1.100");
    assert_eq!(object.channel_id, 1);
}

#[test]
fn pinned_channel_restricts_channelset_resolution() {
    let f = fixture();
    localized(&f);
    let pinned = ChannelContext::new([2]).pin(1);
    let object = f.ds.object_by_channelset(&pinned, 42, None).unwrap().unwrap();
    assert_eq!(object.content_id.to_string(), "1.100");
}

#[test]
fn pin_does_not_hide_content_id_in_selected_leaf() {
    let f = fixture();
    let mut local = ContentObject::new(ContentId::new(PAGE, 300))
        .in_channel(2)
        .with("name", "Nur lokal");
    f.ds.insert(&de(), &mut local).unwrap();

    let pinned = ChannelContext::new([2]).pin(1);
    let object = f
        .ds
        .object_by_content_id(&pinned, ContentId::new(PAGE, 300))
        .unwrap()
        .unwrap();
    assert_eq!(object.internal_id, local.internal_id);
    assert_eq!(object.channel_id, 2);

    // The pinned lookup must not leak into the unpinned cache entry.
    let unpinned = f.ds.object_by_content_id(&de(), ContentId::new(PAGE, 300)).unwrap().unwrap();
    assert_eq!(unpinned.internal_id, local.internal_id);
}

#[test]
fn channelset_of_other_type_is_not_found() {
    let f = fixture();
    localized(&f);
    assert!(f.ds.object_by_channelset(&de(), 42, Some(AUTHOR)).unwrap().is_none());
}

#[test]
fn content_id_falls_back_to_channelset_variant() {
    let f = fixture();
    localized(&f);

    let object = f
        .ds
        .object_by_content_id(&de(), ContentId::new(PAGE, 100))
        .unwrap()
        .unwrap();
    assert_eq!(object.content_id.to_string(), "1.200");
    assert_eq!(object.stored_object_id, Some(100));

    let mut in_place = ContentObject::new(ContentId::new(PAGE, 100));
    assert!(f.ds.resolve(&de(), &mut in_place).unwrap());
    assert_eq!(in_place.channel_id, 2);
    assert_eq!(in_place.stored_object_id, Some(100));
}

#[test]
fn content_id_in_selected_channel_wins() {
    let f = fixture();
    localized(&f);
    let object = f
        .ds
        .object_by_content_id(&master(), ContentId::new(PAGE, 100))
        .unwrap()
        .unwrap();
    assert_eq!(object.channel_id, 1);
    assert_eq!(object.stored_object_id, None);
}

#[test]
fn localized_insert_replaces_cached_resolution() {
    let f = fixture();
    let mut home = ContentObject::new(ContentId::new(PAGE, 100))
        .in_channel(1)
        .with_channelset(42);
    f.ds.insert(&master(), &mut home).unwrap();

    let before = f.ds.load(&de(), ContentId::new(PAGE, 100)).unwrap();
    assert_eq!(before.channel_id, 1);

    let mut startseite = ContentObject::new(ContentId::new(PAGE, 200))
        .in_channel(2)
        .with_channelset(42);
    f.ds.insert(&de(), &mut startseite).unwrap();

    let after = f.ds.load(&de(), ContentId::new(PAGE, 100)).unwrap();
    assert_eq!(after.channel_id, 2);
    assert_eq!(after.content_id.to_string(), "1.200");
}

#[test]
fn missing_object_is_marked() {
    let f = fixture();
    localized(&f);

    let mut object = ContentObject::new(ContentId::new(PAGE, 999));
    assert!(!f.ds.resolve(&de(), &mut object).unwrap());
    assert_eq!(object.internal_id, MISSING);
    assert!(f.ds.get(&de(), &mut object, "name").unwrap().is_empty());

    let err = f.ds.load(&de(), ContentId::new(PAGE, 999)).unwrap_err();
    assert!(matches!(err, DatasourceError::ObjectNotFound(_)));
}

#[test]
fn unknown_channel_is_distinct_error() {
    let f = fixture();
    let err = f
        .ds
        .object_by_content_id(&ChannelContext::new([9]), ContentId::new(PAGE, 100))
        .unwrap_err();
    assert!(matches!(err, DatasourceError::UnknownChannel(9)));
}

#[test]
fn repeated_resolution_is_served_from_cache() {
    let f = fixture();
    localized(&f);
    f.ds.load(&de(), ContentId::new(PAGE, 200)).unwrap();

    let reads = f.backend.read_count();
    let object = f.ds.load(&de(), ContentId::new(PAGE, 200)).unwrap();
    assert_eq!(object.channel_id, 2);
    assert_eq!(f.backend.read_count(), reads);
}

#[test]
fn disabled_cache_always_reads_store() {
    let f = fixture_with(DatasourceConfig {
        cache_enabled: false,
        ..DatasourceConfig::default()
    });
    localized(&f);
    f.ds.load(&de(), ContentId::new(PAGE, 200)).unwrap();
    let reads = f.backend.read_count();
    f.ds.load(&de(), ContentId::new(PAGE, 200)).unwrap();
    assert!(f.backend.read_count() > reads);
}

#[test]
fn concurrent_contexts_do_not_interfere() {
    let f = fixture();
    localized(&f);
    let ds = Arc::new(f.ds);

    std::thread::scope(|s| {
        for (channel, expected) in [(1, "1.100"), (2, "1.200")] {
            let ds = ds.clone();
            s.spawn(move || {
                let ctx = ChannelContext::new([channel]);
                for _ in 0..50 {
                    let object = ds.object_by_channelset(&ctx, 42, None).unwrap().unwrap();
                    assert_eq!(object.content_id.to_string(), expected);
                }
            });
        }
    });
}

// =========================================================================
// Attributes
// =========================================================================

#[test]
fn attributes_load_by_storage_class() {
    let f = fixture();
    let inserted = page(&f, 1, &["a", "b", "c"]);

    let mut object = fresh(&f, &inserted);
    assert_eq!(f.ds.get(&master(), &mut object, "name").unwrap(), texts(&["page 1"]));
    assert_eq!(
        f.ds.get(&master(), &mut object, "keywords").unwrap(),
        texts(&["a", "b", "c"])
    );
    assert_eq!(
        f.ds.get(&master(), &mut object, "summary").unwrap(),
        texts(&["A longer description"])
    );
}

#[test]
fn unknown_attribute_is_an_error() {
    let f = fixture();
    let inserted = page(&f, 1, &[]);
    let mut object = fresh(&f, &inserted);
    assert!(matches!(
        f.ds.get(&master(), &mut object, "colour"),
        Err(DatasourceError::Type(_))
    ));
}

#[test]
fn empty_attribute_is_cached_as_null() {
    let f = fixture();
    let mut bare = ContentObject::new(ContentId::new(PAGE, 1)).with("name", "bare");
    f.ds.insert(&master(), &mut bare).unwrap();

    let mut first = fresh(&f, &bare);
    assert!(f.ds.get(&master(), &mut first, "summary").unwrap().is_empty());

    let reads = f.backend.read_count();
    let mut second = fresh(&f, &bare);
    assert!(f.ds.get(&master(), &mut second, "summary").unwrap().is_empty());
    assert_eq!(f.backend.read_count(), reads);
}

#[test]
fn update_invalidates_cached_attribute() {
    let f = fixture();
    let inserted = page(&f, 1, &["a"]);
    let mut object = fresh(&f, &inserted);
    f.ds.get(&master(), &mut object, "summary").unwrap();

    object.set_value("summary", "Rewritten");
    f.ds.update(&master(), &mut object).unwrap();

    let mut reloaded = fresh(&f, &inserted);
    assert_eq!(
        f.ds.get(&master(), &mut reloaded, "summary").unwrap(),
        texts(&["Rewritten"])
    );
}

#[test]
fn text_values_are_truncated_to_cap() {
    let f = fixture_with(DatasourceConfig {
        text_length_cap: 5,
        ..DatasourceConfig::default()
    });
    let mut object = ContentObject::new(ContentId::new(PAGE, 1)).with("name", "Startseite");
    f.ds.insert(&master(), &mut object).unwrap();
    let mut reloaded = fresh(&f, &object);
    assert_eq!(f.ds.get(&master(), &mut reloaded, "name").unwrap(), texts(&["Start"]));
}

// =========================================================================
// Links
// =========================================================================

#[test]
fn links_and_foreign_links() {
    let f = fixture();
    let mut author = ContentObject::new(ContentId::new(AUTHOR, 5)).with("name", "Ada");
    f.ds.insert(&master(), &mut author).unwrap();
    for obj_id in [1, 2] {
        let mut page = ContentObject::new(ContentId::new(PAGE, obj_id))
            .with("author", ContentId::new(AUTHOR, 5));
        f.ds.insert(&master(), &mut page).unwrap();
    }

    let mut author = fresh(&f, &author);
    let pages = f.ds.get(&master(), &mut author, "pages").unwrap();
    assert_eq!(
        pages,
        vec![
            AttributeValue::Link(ContentId::new(PAGE, 1)),
            AttributeValue::Link(ContentId::new(PAGE, 2)),
        ]
    );

    let mut page = f.ds.load(&master(), ContentId::new(PAGE, 1)).unwrap();
    let linked = f.ds.linked_objects(&master(), &mut page, "author").unwrap();
    assert_eq!(linked.len(), 1);
    assert_eq!(linked[0].content_id, ContentId::new(AUTHOR, 5));
}

#[test]
fn broken_link_resolves_to_nothing() {
    let f = fixture();
    let mut page = ContentObject::new(ContentId::new(PAGE, 1)).with("author", ContentId::new(AUTHOR, 99));
    f.ds.insert(&master(), &mut page).unwrap();
    let mut page = fresh(&f, &page);
    assert!(f.ds.linked_objects(&master(), &mut page, "author").unwrap().is_empty());
}

// =========================================================================
// Prefetch
// =========================================================================

#[test]
fn prefetch_bulk_loads_then_serves_from_cache() {
    let f = fixture();
    let pages: Vec<ContentObject> = (1..=3).map(|i| page(&f, i, &["k"])).collect();
    let mut bare = ContentObject::new(ContentId::new(PAGE, 4)).with("name", "bare");
    f.ds.insert(&master(), &mut bare).unwrap();

    let mut objects: Vec<ContentObject> = pages.iter().chain([&bare]).map(|p| fresh(&f, p)).collect();
    let report = f.ds.prefetch(&master(), &mut objects, &["summary", "name"]).unwrap();
    assert_eq!(report.bulk, vec!["name", "summary"]);
    assert!(report.cached.is_empty());
    assert_eq!(report.queries, 2);
    assert_eq!(objects[0].values("summary").unwrap(), texts(&["A longer description"]));
    assert_eq!(objects[3].values("summary"), Some(&[][..]));

    let reads = f.backend.read_count();
    let mut again: Vec<ContentObject> = pages.iter().chain([&bare]).map(|p| fresh(&f, p)).collect();
    let report = f.ds.prefetch(&master(), &mut again, &["summary", "name"]).unwrap();
    assert_eq!(report.cached, vec!["name", "summary"]);
    assert!(report.bulk.is_empty());
    assert_eq!(report.queries, 0);
    assert_eq!(f.backend.read_count(), reads);
    assert_eq!(again[3].values("summary"), Some(&[][..]));
}

#[test]
fn prefetch_follows_dotted_paths() {
    let f = fixture();
    let mut author = ContentObject::new(ContentId::new(AUTHOR, 5)).with("name", "Ada");
    f.ds.insert(&master(), &mut author).unwrap();
    let mut pages = Vec::new();
    for obj_id in [1, 2] {
        let mut page = ContentObject::new(ContentId::new(PAGE, obj_id))
            .with("author", ContentId::new(AUTHOR, 5));
        f.ds.insert(&master(), &mut page).unwrap();
        pages.push(fresh(&f, &page));
    }

    let report = f.ds.prefetch(&master(), &mut pages, &["author.name"]).unwrap();
    assert_eq!(report.bulk, vec!["author", "author.name"]);
    assert_eq!(report.queries, 3);

    let mut author = fresh(&f, &author);
    let reads = f.backend.read_count();
    assert_eq!(f.ds.get(&master(), &mut author, "name").unwrap(), texts(&["Ada"]));
    assert_eq!(f.backend.read_count(), reads);
}

#[test]
fn dotted_paths_stop_at_the_link_without_cache() {
    let f = fixture_with(DatasourceConfig {
        cache_enabled: false,
        ..DatasourceConfig::default()
    });
    let mut author = ContentObject::new(ContentId::new(AUTHOR, 5)).with("name", "Ada");
    f.ds.insert(&master(), &mut author).unwrap();
    let mut page = ContentObject::new(ContentId::new(PAGE, 1)).with("author", ContentId::new(AUTHOR, 5));
    f.ds.insert(&master(), &mut page).unwrap();

    let mut pages = vec![fresh(&f, &page)];
    let report = f.ds.prefetch(&master(), &mut pages, &["author.name"]).unwrap();
    assert_eq!(report.bulk, vec!["author"]);
    assert_eq!(report.queries, 1);
    assert!(pages[0].has("author"));
}

#[test]
fn disabled_prefetch_does_nothing() {
    let mut config = DatasourceConfig::default();
    config.prefetch.enabled = false;
    let f = fixture_with(config);
    let inserted = page(&f, 1, &["k"]);
    let mut objects = vec![fresh(&f, &inserted)];
    let report = f.ds.prefetch(&master(), &mut objects, &["summary"]).unwrap();
    assert_eq!(report.queries, 0);
    assert!(!objects[0].has("summary"));
}

// =========================================================================
// Writes
// =========================================================================

#[test]
fn multivalue_shrink_updates_and_deletes_positions() {
    let f = fixture();
    let inserted = page(&f, 1, &["a", "b", "c"]);
    f.backend.clear_journal();

    let mut object = fresh(&f, &inserted);
    object.set("keywords", texts(&["x", "y"]));
    f.ds.update(&master(), &mut object).unwrap();

    let id = inserted.internal_id;
    let keyword_statements: Vec<Statement> = f
        .backend
        .journal()
        .into_iter()
        .filter(|s| s.attribute_name() == Some("keywords"))
        .collect();
    assert_eq!(keyword_statements.len(), 3);
    for expected in [
        Statement::UpdateAttribute {
            map_id: id,
            name: "keywords".into(),
            sort_order: 0,
            value: RowValue::Text("x".into()),
        },
        Statement::UpdateAttribute {
            map_id: id,
            name: "keywords".into(),
            sort_order: 1,
            value: RowValue::Text("y".into()),
        },
        Statement::DeleteAttribute {
            map_id: id,
            name: "keywords".into(),
            sort_order: 2,
        },
    ] {
        assert!(keyword_statements.contains(&expected), "missing {expected:?}");
    }

    let mut reloaded = fresh(&f, &inserted);
    assert_eq!(f.ds.get(&master(), &mut reloaded, "keywords").unwrap(), texts(&["x", "y"]));
}

#[test]
fn update_writes_only_changed_attributes() {
    let f = fixture();
    let inserted = page(&f, 1, &["a", "b"]);
    let mut object = fresh(&f, &inserted);
    for name in ["name", "keywords", "summary"] {
        f.ds.get(&master(), &mut object, name).unwrap();
    }

    f.backend.clear_journal();
    object.set_value("summary", "Changed");
    f.ds.update(&master(), &mut object).unwrap();
    let journal = f.backend.journal();
    let attribute_statements: Vec<&Statement> =
        journal.iter().filter(|s| s.attribute_name().is_some()).collect();
    assert_eq!(attribute_statements.len(), 1);
    assert_eq!(attribute_statements[0].attribute_name(), Some("summary"));
    assert!(journal.iter().all(|s| match s {
        Statement::UpdateContent { columns, .. } => columns.is_empty(),
        _ => true,
    }));

    f.backend.clear_journal();
    object.set_value("name", "Start");
    f.ds.update(&master(), &mut object).unwrap();
    let journal = f.backend.journal();
    assert_eq!(journal.len(), 1);
    match &journal[0] {
        Statement::UpdateContent { columns, .. } => {
            assert_eq!(columns.len(), 1);
            assert_eq!(columns["quick_name"], Some(RowValue::Text("Start".into())));
        }
        other => panic!("unexpected statement {other:?}"),
    }

    f.backend.clear_journal();
    assert_eq!(f.ds.update(&master(), &mut object).unwrap(), 0);
    assert!(f.backend.journal().is_empty());
}

#[test]
fn update_batch_commits_once() {
    let f = fixture();
    let pages: Vec<ContentObject> = (1..=3).map(|i| page(&f, i, &[])).collect();
    let mut objects: Vec<ContentObject> = pages
        .iter()
        .map(|p| {
            let mut object = fresh(&f, p);
            object.set_value("summary", format!("batch {}", p.content_id));
            object
        })
        .collect();

    f.backend.clear_journal();
    let executed = f.ds.update_batch(&master(), &mut objects).unwrap();
    assert_eq!(executed, 6);
    assert_eq!(f.backend.journal().len(), 6);
}

#[test]
fn insert_batch_writes_attributes_in_one_group() {
    let f = fixture();
    let mut objects: Vec<ContentObject> = (1..=3)
        .map(|i| {
            let mut object = ContentObject::new(ContentId::new(PAGE, i))
                .with("name", format!("page {i}"))
                .with("summary", "batched");
            object.set("keywords", texts(&["a", "b"]));
            object
        })
        .collect();

    let before = f.backend.execution_count();
    let executed = f.ds.insert_batch(&master(), &mut objects).unwrap();
    assert_eq!(executed, 9);
    assert_eq!(f.backend.execution_count(), before + 1);
    assert_eq!(f.backend.content_len(), 3);
    assert!(objects.iter().all(ContentObject::exists));

    let mut reloaded = fresh(&f, &objects[2]);
    assert_eq!(f.ds.get(&master(), &mut reloaded, "keywords").unwrap(), texts(&["a", "b"]));
}

#[test]
fn insert_batch_rolls_back_every_row_on_failure() {
    let f = fixture();
    let mut objects = vec![
        ContentObject::new(ContentId::new(PAGE, 1)).with("summary", "fine"),
        ContentObject::new(ContentId::new(PAGE, 1)).with("summary", "same content id"),
    ];
    assert!(f.ds.insert_batch(&master(), &mut objects).is_err());
    assert_eq!(f.backend.content_len(), 0);
    assert_eq!(f.backend.attribute_len(), 0);
    assert!(objects.iter().all(|o| !o.exists()));
}

#[test]
fn delete_batch_commits_once() {
    let f = fixture();
    let mut objects: Vec<ContentObject> = (1..=3).map(|i| page(&f, i, &["a"])).collect();
    objects.push(ContentObject::new(ContentId::new(PAGE, 9)));

    f.backend.clear_journal();
    let before = f.backend.execution_count();
    assert_eq!(f.ds.delete_batch(&mut objects).unwrap(), 3);
    assert_eq!(f.backend.execution_count(), before + 1);
    assert_eq!(f.backend.journal().len(), 6);
    assert_eq!(f.backend.content_len(), 0);
    assert_eq!(f.backend.attribute_len(), 0);
    assert!(objects[..3].iter().all(|o| o.internal_id == MISSING));
    assert_eq!(f.ds.delete_batch(&mut objects).unwrap(), 0);
}

#[test]
fn coercion_failure_aborts_write() {
    let f = fixture();
    let mut bad = ContentObject::new(ContentId::new(PAGE, 1)).with("rank", "not a number");
    assert!(matches!(
        f.ds.insert(&master(), &mut bad),
        Err(DatasourceError::Coercion { .. })
    ));
    assert_eq!(f.backend.content_len(), 0);

    let inserted = page(&f, 2, &[]);
    f.backend.clear_journal();
    let mut object = fresh(&f, &inserted);
    object.set_value("rank", "twelve");
    assert!(f.ds.update(&master(), &mut object).is_err());
    assert!(f.backend.journal().is_empty());
}

#[test]
fn insert_of_existing_object_is_rejected() {
    let f = fixture();
    let inserted = page(&f, 1, &[]);
    let mut again = fresh(&f, &inserted);
    assert!(matches!(
        f.ds.insert(&master(), &mut again),
        Err(DatasourceError::AlreadyExists(_))
    ));
}

#[test]
fn save_inserts_then_updates() {
    let f = fixture();
    let mut object = ContentObject::new(ContentId::new(PAGE, 1)).with("summary", "first");
    f.ds.save(&master(), &mut object).unwrap();
    assert!(object.exists());

    let mut same = ContentObject::new(ContentId::new(PAGE, 1)).with("summary", "second");
    f.ds.save(&master(), &mut same).unwrap();
    assert_eq!(same.internal_id, object.internal_id);
    assert_eq!(f.backend.content_len(), 1);

    let mut reloaded = fresh(&f, &object);
    assert_eq!(f.ds.get(&master(), &mut reloaded, "summary").unwrap(), texts(&["second"]));
}

#[test]
fn delete_is_idempotent() {
    let f = fixture();
    let mut unsaved = ContentObject::new(ContentId::new(PAGE, 1));
    assert!(!f.ds.delete(&mut unsaved).unwrap());

    let mut object = page(&f, 1, &["a", "b"]);
    assert!(f.ds.delete(&mut object).unwrap());
    assert_eq!(f.backend.content_len(), 0);
    assert_eq!(f.backend.attribute_len(), 0);
    assert_eq!(object.internal_id, MISSING);
    assert!(!f.ds.delete(&mut object).unwrap());

    let mut gone = ContentObject::new(ContentId::new(PAGE, 1));
    assert!(!f.ds.resolve(&master(), &mut gone).unwrap());
}

// =========================================================================
// Filesystem attributes
// =========================================================================

#[test]
fn blob_attributes_are_deduplicated_and_removed_on_delete() {
    let dir = tempfile::tempdir().unwrap();
    let f = fixture_with(DatasourceConfig {
        filesystem_base_path: Some(dir.path().to_path_buf()),
        ..DatasourceConfig::default()
    });
    let photo = AttributeValue::Binary(b"portrait".to_vec());
    let mut ada = ContentObject::new(ContentId::new(AUTHOR, 1)).with("photo", photo.clone());
    let mut bob = ContentObject::new(ContentId::new(AUTHOR, 2)).with("photo", photo.clone());
    f.ds.insert(&master(), &mut ada).unwrap();
    f.ds.insert(&master(), &mut bob).unwrap();
    assert_eq!(count_files(dir.path()), 2);

    let mut loaded = fresh(&f, &ada);
    assert_eq!(f.ds.get(&master(), &mut loaded, "photo").unwrap(), vec![photo.clone()]);

    assert!(f.ds.delete(&mut ada).unwrap());
    assert_eq!(count_files(dir.path()), 1);

    f.ds.cache().clear_all();
    let mut bob = fresh(&f, &bob);
    assert_eq!(f.ds.get(&master(), &mut bob, "photo").unwrap(), vec![photo]);

    bob.set_value("photo", AttributeValue::Binary(b"new portrait".to_vec()));
    f.ds.update(&master(), &mut bob).unwrap();
    assert_eq!(count_files(dir.path()), 1);
    let mut reloaded = fresh(&f, &bob);
    assert_eq!(
        f.ds.get(&master(), &mut reloaded, "photo").unwrap(),
        vec![AttributeValue::Binary(b"new portrait".to_vec())]
    );
}

#[test]
fn filesystem_attribute_without_base_path_fails() {
    let f = fixture();
    let mut ada = ContentObject::new(ContentId::new(AUTHOR, 1))
        .with("photo", AttributeValue::Binary(b"x".to_vec()));
    assert!(matches!(
        f.ds.insert(&master(), &mut ada),
        Err(DatasourceError::Config(_))
    ));
    assert_eq!(f.backend.content_len(), 0);
}

// =========================================================================
// Queries
// =========================================================================

#[test]
fn query_returns_one_variant_per_channelset() {
    let f = fixture();
    localized(&f);
    let filter = Expression::ObjectType(PAGE);

    let found = f.ds.query(&de(), &filter, Paging::default()).unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].content_id.to_string(), "1.200");

    let found = f.ds.query(&master(), &filter, Paging::default()).unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].content_id.to_string(), "1.100");

    assert_eq!(f.ds.count(&de(), &filter).unwrap(), 1);
}

#[test]
fn query_hides_ancestor_variant_overridden_in_channel() {
    let f = fixture();
    localized(&f);
    let home = Expression::ColumnEquals {
        column: "quick_name".into(),
        value: RowValue::Text("Home".into()),
    };

    assert!(f.ds.query(&de(), &home, Paging::default()).unwrap().is_empty());
    assert_eq!(f.ds.count(&de(), &home).unwrap(), 0);

    let found = f.ds.query(&master(), &home, Paging::default()).unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].content_id.to_string(), "1.100");

    let startseite = Expression::ColumnEquals {
        column: "quick_name".into(),
        value: RowValue::Text("Startseite".into()),
    };
    let found = f.ds.query(&de(), &startseite, Paging::default()).unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].channel_id, 2);
    let resolved = f.ds.object_by_channelset(&de(), 42, None).unwrap().unwrap();
    assert_eq!(found[0].internal_id, resolved.internal_id);
}

#[test]
fn query_results_are_cached_until_a_write() {
    let f = fixture();
    page(&f, 1, &[]);
    let filter = Expression::ObjectType(PAGE);
    assert_eq!(f.ds.query(&de(), &filter, Paging::default()).unwrap().len(), 1);

    let reads = f.backend.read_count();
    assert_eq!(f.ds.query(&de(), &filter, Paging::default()).unwrap().len(), 1);
    assert_eq!(f.ds.count(&de(), &filter).unwrap(), 1);
    let after_count = f.backend.read_count();
    assert_eq!(f.ds.count(&de(), &filter).unwrap(), 1);
    assert_eq!(f.backend.read_count(), after_count);
    // One read for the matches, one for their channelset variants.
    assert_eq!(after_count, reads + 2);

    page(&f, 2, &[]);
    assert_eq!(f.ds.query(&de(), &filter, Paging::default()).unwrap().len(), 2);
    assert_eq!(f.ds.count(&de(), &filter).unwrap(), 2);
}

#[test]
fn query_paging() {
    let f = fixture();
    let pages: Vec<ContentObject> = (1..=3).map(|i| page(&f, i, &[])).collect();
    let found = f
        .ds
        .query(&master(), &Expression::All, Paging::new(1, 1))
        .unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].internal_id, pages[1].internal_id);
}

// =========================================================================
// Sync checking
// =========================================================================

fn syncing(warming: CacheWarmingConfig) -> Fixture {
    fixture_with(DatasourceConfig {
        sync_checking: SyncCheckingConfig {
            enabled: true,
            differential: true,
        },
        cache_warming: warming,
        ..DatasourceConfig::default()
    })
}

#[test]
fn sync_checking_is_off_by_default() {
    let f = fixture();
    assert_eq!(f.ds.check_for_updates().unwrap(), RefreshOutcome::Disabled);
}

#[test]
fn foreign_writes_are_evicted() {
    let f = syncing(CacheWarmingConfig::default());
    let (home, _) = localized(&f);
    assert_eq!(
        f.ds.check_for_updates().unwrap(),
        RefreshOutcome::Refreshed { evicted: 2, warmed: 0 }
    );
    assert_eq!(f.ds.check_for_updates().unwrap(), RefreshOutcome::Unchanged);

    fresh(&f, &home);
    f.backend.touch(home.internal_id, home.update_timestamp + 60_000).unwrap();
    assert_eq!(
        f.ds.check_for_updates().unwrap(),
        RefreshOutcome::Refreshed { evicted: 1, warmed: 0 }
    );
    let reads = f.backend.read_count();
    fresh(&f, &home);
    assert!(f.backend.read_count() > reads);
}

#[test]
fn foreign_writes_matching_filter_are_rewarmed() {
    let f = syncing(CacheWarmingConfig {
        on_init: false,
        filter: Some(Expression::ObjectType(PAGE)),
        attributes: vec!["summary".into()],
    });
    let inserted = page(&f, 1, &[]);
    f.ds.check_for_updates().unwrap();

    f.backend
        .touch(inserted.internal_id, inserted.update_timestamp + 60_000)
        .unwrap();
    assert_eq!(
        f.ds.check_for_updates().unwrap(),
        RefreshOutcome::Refreshed { evicted: 0, warmed: 1 }
    );

    let reads = f.backend.read_count();
    let mut object = fresh(&f, &inserted);
    assert_eq!(
        f.ds.get(&master(), &mut object, "summary").unwrap(),
        texts(&["A longer description"])
    );
    assert_eq!(f.backend.read_count(), reads);
}

#[test]
fn failed_refresh_clears_cache() {
    let f = syncing(CacheWarmingConfig::default());
    let (home, _) = localized(&f);
    fresh(&f, &home);

    f.backend.set_unavailable(true);
    assert_eq!(f.ds.refresh_since(0), RefreshOutcome::Cleared);
    f.backend.set_unavailable(false);

    let reads = f.backend.read_count();
    fresh(&f, &home);
    assert!(f.backend.read_count() > reads);
}

#[test]
fn warm_cache_loads_filtered_objects() {
    let f = fixture_with(DatasourceConfig {
        cache_warming: CacheWarmingConfig {
            on_init: false,
            filter: Some(Expression::ObjectType(PAGE)),
            attributes: vec!["keywords".into()],
        },
        ..DatasourceConfig::default()
    });
    let inserted = page(&f, 1, &["warm"]);
    assert_eq!(f.ds.warm_cache().unwrap(), 1);

    let reads = f.backend.read_count();
    let mut object = fresh(&f, &inserted);
    assert_eq!(f.ds.get(&master(), &mut object, "keywords").unwrap(), texts(&["warm"]));
    assert_eq!(f.backend.read_count(), reads);
}
