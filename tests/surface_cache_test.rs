use std::sync::Arc;
use std::time::Duration;

use slidecache::surface::{
    CacheError, Command, Dimensions, PageVariant, RenderError, Surface, ViewportId, WriteOutcome,
};
use slidecache::synthetic::SyntheticDocument;
use slidecache::test_utils::test_helpers::{CacheBuilder, RecordingBackend};

const IDLE: Duration = Duration::from_secs(5);

#[test]
fn miss_renders_once_then_hits() {
    let backend = Arc::new(RecordingBackend::new());
    let mut cache = CacheBuilder::new(10).window(0, 0).build(backend.clone());
    cache.configure_viewport("c_da", PageVariant::Full, None).unwrap();
    cache.on_resize("c_da", 64, 36).unwrap();

    let first = cache.render_with_backend("c_da", 0).unwrap();
    let second = cache.render_with_backend("c_da", 0).unwrap();

    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(backend.count(), 1);
    assert_eq!(first.dimensions(), Dimensions::new(64, 36));

    let stats = cache.stats();
    assert_eq!(stats.miss_fills, 1);
    assert_eq!(stats.hits, 1);
    assert_eq!(stats.misses, 1);
    assert!((stats.hit_rate() - 0.5).abs() < f64::EPSILON);
}

#[test]
fn stats_report_surface_memory() {
    let backend = Arc::new(RecordingBackend::new());
    let mut cache = CacheBuilder::new(10).window(0, 0).build(backend);
    cache.configure_viewport("c_da", PageVariant::Full, None).unwrap();
    cache.on_resize("c_da", 64, 36).unwrap();
    assert_eq!(cache.stats().memory_bytes, 0);

    cache.render_with_backend("c_da", 0).unwrap();
    cache.render_with_backend("c_da", 1).unwrap();
    let stats = cache.stats();
    assert_eq!(stats.entries, 2);
    assert_eq!(stats.memory_bytes, 2 * 64 * 36 * 4);
    assert_eq!(stats.in_flight, 0);
}

#[test]
fn shared_viewports_see_one_entry() {
    let backend = Arc::new(RecordingBackend::new());
    let mut cache = CacheBuilder::new(10).window(0, 0).build(backend.clone());
    cache.configure_viewport("c_da", PageVariant::Full, None).unwrap();
    cache
        .configure_viewport("p_da_cur", PageVariant::Full, Some("c_da"))
        .unwrap();
    cache.on_resize("c_da", 64, 36).unwrap();

    let rendered = cache.render_with_backend("c_da", 2).unwrap();
    let seen = cache.get("p_da_cur", 2).expect("shared entry");

    assert!(Arc::ptr_eq(&rendered, &seen));
    assert!(cache.shares_surfaces("c_da", "p_da_cur"));
    assert_eq!(cache.entry_count(), 1);
    assert_eq!(cache.dimensions("p_da_cur"), Some(Dimensions::new(64, 36)));
}

#[test]
fn resize_drops_old_surfaces() {
    let backend = Arc::new(RecordingBackend::new());
    let mut cache = CacheBuilder::new(10).window(0, 0).build(backend.clone());
    cache.configure_viewport("c_da", PageVariant::Full, None).unwrap();
    cache.on_resize("c_da", 64, 36).unwrap();
    cache.render_with_backend("c_da", 0).unwrap();

    cache.on_resize("c_da", 128, 72).unwrap();
    assert!(cache.get("c_da", 0).is_none());

    let surface = cache.render_with_backend("c_da", 0).unwrap();
    assert_eq!(surface.dimensions(), Dimensions::new(128, 72));
    assert_eq!(backend.count(), 2);
}

#[test]
fn same_size_resize_keeps_surfaces() {
    let backend = Arc::new(RecordingBackend::new());
    let mut cache = CacheBuilder::new(10).window(0, 0).build(backend.clone());
    cache.configure_viewport("c_da", PageVariant::Full, None).unwrap();
    cache.on_resize("c_da", 64, 36).unwrap();
    cache.render_with_backend("c_da", 0).unwrap();

    cache.on_resize("c_da", 64, 36).unwrap();
    assert!(cache.get("c_da", 0).is_some());
}

#[test]
fn variant_change_drops_old_surfaces() {
    let backend = Arc::new(RecordingBackend::new());
    let mut cache = CacheBuilder::new(10)
        .with_notes()
        .window(0, 0)
        .build(backend.clone());
    cache.configure_viewport("c_da", PageVariant::Full, None).unwrap();
    cache.on_resize("c_da", 64, 36).unwrap();
    cache.render_with_backend("c_da", 0).unwrap();

    cache
        .on_variant_change("c_da", PageVariant::ContentHalf)
        .unwrap();
    assert!(cache.get("c_da", 0).is_none());
    assert_eq!(cache.variant("c_da"), Some(PageVariant::ContentHalf));

    cache.render_with_backend("c_da", 0).unwrap();
    let last = *backend.calls().last().unwrap();
    assert_eq!(last.variant, PageVariant::ContentHalf);
}

#[test]
fn put_with_outdated_dimensions_is_stale() {
    let backend = Arc::new(RecordingBackend::new());
    let mut cache = CacheBuilder::new(10).window(0, 0).build(backend);
    cache.configure_viewport("c_da", PageVariant::Full, None).unwrap();
    cache.on_resize("c_da", 8, 8).unwrap();

    let old = Arc::new(Surface::blank(Dimensions::new(4, 4)));
    let outcome = cache
        .put("c_da", 1, old, Dimensions::new(4, 4))
        .unwrap();
    assert_eq!(outcome, WriteOutcome::Stale);
    assert!(cache.get("c_da", 1).is_none());

    let fresh = Arc::new(Surface::blank(Dimensions::new(8, 8)));
    let outcome = cache
        .put("c_da", 1, fresh, Dimensions::new(8, 8))
        .unwrap();
    assert_eq!(outcome, WriteOutcome::Stored);
    assert!(cache.get("c_da", 1).is_some());
    assert_eq!(cache.stats().stale_writes, 1);
}

#[test]
fn unknown_and_unsized_viewports_are_errors() {
    let backend = Arc::new(RecordingBackend::new());
    let mut cache = CacheBuilder::new(10).build(backend.clone());

    assert!(cache.get("nope", 0).is_none());
    assert_eq!(
        cache.render_with_backend("nope", 0).unwrap_err(),
        CacheError::UnknownViewport(ViewportId::new("nope"))
    );

    cache.configure_viewport("c_da", PageVariant::Full, None).unwrap();
    assert_eq!(
        cache.render_with_backend("c_da", 0).unwrap_err(),
        CacheError::UnsizedViewport(ViewportId::new("c_da"))
    );
    assert!(cache.on_navigate(3).is_empty());
    assert_eq!(backend.count(), 0);
}

#[test]
fn page_out_of_range_is_rejected() {
    let backend = Arc::new(RecordingBackend::new());
    let mut cache = CacheBuilder::new(3).build(backend);
    cache.configure_viewport("c_da", PageVariant::Full, None).unwrap();
    cache.on_resize("c_da", 8, 8).unwrap();

    assert_eq!(
        cache.render_with_backend("c_da", 3).unwrap_err(),
        CacheError::Render(RenderError::PageOutOfRange {
            page: 3,
            page_count: 3
        })
    );
}

#[test]
fn failed_miss_fill_leaves_slot_empty() {
    let backend = Arc::new(RecordingBackend::failing([1]));
    let mut cache = CacheBuilder::new(5).window(0, 0).build(backend.clone());
    cache.configure_viewport("c_da", PageVariant::Full, None).unwrap();
    cache.on_resize("c_da", 8, 8).unwrap();

    let err = cache.render_with_backend("c_da", 1).unwrap_err();
    assert!(matches!(
        err,
        CacheError::Render(RenderError::Backend { page: 1, .. })
    ));
    assert!(cache.get("c_da", 1).is_none());

    // Retried on the next request
    assert!(cache.render_with_backend("c_da", 1).is_err());
    assert_eq!(backend.count(), 2);
    assert_eq!(cache.stats().render_failures, 2);
}

#[test]
fn caller_supplied_renderer_is_used_on_miss() {
    let backend = Arc::new(RecordingBackend::new());
    let mut cache = CacheBuilder::new(5).window(0, 0).build(backend.clone());
    cache.configure_viewport("ink", PageVariant::Full, None).unwrap();
    cache.on_resize("ink", 6, 6).unwrap();

    let surface = cache
        .get_or_render("ink", 4, |page, dims, variant| {
            assert_eq!(page.index, 4);
            assert_eq!(variant, PageVariant::Full);
            Ok(Surface::blank(dims))
        })
        .unwrap();

    assert_eq!(surface.dimensions(), Dimensions::new(6, 6));
    assert_eq!(backend.count(), 0);
    assert!(cache.get("ink", 4).is_some());
}

#[test]
fn deregistering_keeps_storage_for_remaining_members() {
    let backend = Arc::new(RecordingBackend::new());
    let mut cache = CacheBuilder::new(5).window(0, 0).build(backend);
    cache.configure_viewport("b", PageVariant::Full, None).unwrap();
    cache.configure_viewport("c", PageVariant::Full, Some("b")).unwrap();
    cache.on_resize("b", 8, 8).unwrap();
    cache.render_with_backend("b", 0).unwrap();

    cache.deregister_viewport("b").unwrap();

    assert!(cache.viewport("b").is_none());
    assert!(cache.get("c", 0).is_some());
    assert_eq!(cache.dimensions("c"), Some(Dimensions::new(8, 8)));

    cache.deregister_viewport("c").unwrap();
    assert_eq!(cache.entry_count(), 0);
    assert_eq!(
        cache.deregister_viewport("c").unwrap_err(),
        CacheError::UnknownViewport(ViewportId::new("c"))
    );
}

#[test]
fn joining_a_group_with_a_smaller_id_rekeys_storage() {
    let backend = Arc::new(RecordingBackend::new());
    let mut cache = CacheBuilder::new(5).window(0, 0).build(backend);
    cache.configure_viewport("p_da_cur", PageVariant::Full, None).unwrap();
    cache.on_resize("p_da_cur", 8, 8).unwrap();
    cache.render_with_backend("p_da_cur", 1).unwrap();

    cache
        .configure_viewport("c_da", PageVariant::Full, Some("p_da_cur"))
        .unwrap();

    assert!(cache.shares_surfaces("c_da", "p_da_cur"));
    assert!(cache.get("c_da", 1).is_some());
    assert_eq!(cache.entry_count(), 1);
}

#[test]
fn sharing_with_unknown_viewport_fails() {
    let backend = Arc::new(RecordingBackend::new());
    let mut cache = CacheBuilder::new(5).build(backend);

    let err = cache
        .configure_viewport("p_da_cur", PageVariant::Full, Some("c_da"))
        .unwrap_err();
    assert!(matches!(err, CacheError::UnknownShareTarget { .. }));
    assert!(cache.viewport("p_da_cur").is_none());
}

#[test]
fn batch_stops_at_first_error_but_keeps_earlier_commands() {
    let backend = Arc::new(RecordingBackend::new());
    let mut cache = CacheBuilder::new(5).window(0, 0).build(backend);
    cache.configure_viewport("c_da", PageVariant::Full, None).unwrap();

    let err = cache
        .apply([
            Command::Resize {
                id: ViewportId::new("c_da"),
                dims: Dimensions::new(8, 8),
            },
            Command::Resize {
                id: ViewportId::new("missing"),
                dims: Dimensions::new(8, 8),
            },
            Command::Navigate(3),
        ])
        .unwrap_err();

    assert_eq!(err, CacheError::UnknownViewport(ViewportId::new("missing")));
    assert_eq!(cache.dimensions("c_da"), Some(Dimensions::new(8, 8)));
    assert_eq!(cache.current_page(), 0);
}

#[test]
fn swapping_document_drops_everything_and_clamps_page() {
    let backend = Arc::new(RecordingBackend::new());
    let mut cache = CacheBuilder::new(10).build(backend.clone());
    cache.configure_viewport("c_da", PageVariant::Full, None).unwrap();
    cache.on_resize("c_da", 8, 8).unwrap();
    cache.on_navigate(5);
    cache.render_with_backend("c_da", 5).unwrap();
    assert!(cache.wait_idle(IDLE));

    cache.swap_document(Arc::new(SyntheticDocument::new(3)), backend.clone());

    assert_eq!(cache.page_count(), 3);
    assert_eq!(cache.current_page(), 2);
    assert!(cache.get("c_da", 5).is_none());

    assert!(cache.wait_idle(IDLE));
    let mut pages = cache.cached_pages("c_da");
    pages.sort_unstable();
    assert_eq!(pages, vec![0, 1]);
}
