//! End-to-end tests over a Pattern Lab style source tree

use std::fs;
use std::path::{Path, PathBuf};

use pattern_engine::render::RenderError;
use pattern_engine::{parse, Engine, EngineConfig, EngineError, MemoryDataStore, Resolver};
use pretty_assertions::assert_eq;
use serde_json::{json, Map, Value};
use tempfile::TempDir;

struct Fixture {
    _root: TempDir,
    source: PathBuf,
    templates: PathBuf,
}

fn write(path: &Path, content: &str) {
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, content).unwrap();
}

fn fixture() -> Fixture {
    let root = tempfile::tempdir().unwrap();
    let source = root.path().join("source");
    let patterns = source.join("_patterns");
    let templates = root.path().join("templates");

    write(
        &patterns.join("00-atoms/00-button.twig"),
        r#"<button class="{{ size|default('normal') }}">{{ label }}</button>"#,
    );
    write(
        &patterns.join("00-atoms/00-button.json"),
        r#"{"label": "Go", "size": "small"}"#,
    );
    write(&patterns.join("00-atoms/01-icon.twig"), "<i>{{ icon }}</i>");
    write(
        &patterns.join("01-molecules/00-card.twig"),
        r#"<div class="card">{% block title %}<h2>{{ title }}</h2>{% endblock %}{% block body %}{% endblock %}</div>"#,
    );
    write(&patterns.join("01-molecules/00-card.json"), r#"{"title": "Card"}"#);
    write(&patterns.join("03-test/vars.twig"), "a={{ a }} b={{ b }} c={{ c }}");
    write(&patterns.join("03-test/vars.json"), r#"{"a": 1}"#);
    write(&patterns.join("03-test/nodata.twig"), "x={{ x }}");
    write(&patterns.join("custom/widget.twig"), "W");
    write(&patterns.join("00/ignored.twig"), "ignored");

    write(
        &source.join("_macros/forms.macro"),
        "{% macro button(label) %}<b>{{ label }}</b>{% endmacro %}",
    );
    write(
        &source.join("_macros/ui.macro"),
        r#"{% macro btn() %}{% include "atoms-button" %}{% endmacro %}"#,
    );
    write(
        &source.join("_layouts/base.twig"),
        "<html>{% block content %}{% endblock %}</html>",
    );

    let components = source.join("_twig-components");
    write(&components.join("filters/slugify.filter"), "");
    write(&components.join("filters/_wordcount.filter"), "");
    write(&components.join("filters/unknown.filter"), "");
    write(&components.join("functions/pl_example.function"), "");
    write(&components.join("tags/spaceless.tag"), "");
    write(&components.join("tests/url.test"), "");

    write(&templates.join("atoms-button"), "shadowed");
    write(&templates.join("page.twig"), "page:{% include 'atoms-icon' %}");

    Fixture {
        _root: root,
        source,
        templates,
    }
}

impl Fixture {
    fn config(&self) -> EngineConfig {
        EngineConfig::new()
            .with_source_dir(&self.source)
            .with_template_dir(&self.templates)
    }

    fn engine(&self) -> Engine {
        Engine::new(self.config()).unwrap()
    }
}

fn context(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => panic!("expected object"),
    }
}

#[test]
fn test_namespaces_in_directory_order() {
    let fixture = fixture();
    let engine = fixture.engine();
    let names: Vec<_> = engine.namespaces().iter().map(|n| n.name.as_str()).collect();
    assert_eq!(names, vec!["atoms", "molecules", "test", "custom"]);
    assert_eq!(
        engine.namespaces().get("atoms").unwrap().directory,
        fixture.source.join("_patterns/00-atoms")
    );
}

#[test]
fn test_pattern_partials_win_over_files() {
    let fixture = fixture();
    let engine = fixture.engine();
    assert!(fixture.templates.join("atoms-button").is_file());
    assert_eq!(
        engine.render("atoms-button", context(json!({"label": "x"}))).unwrap(),
        r#"<button class="normal">x</button>"#
    );
    let source = engine.resolver().load("atoms-button").unwrap();
    assert_eq!(
        source.path,
        Some(fixture.source.join("_patterns/00-atoms/00-button.twig"))
    );
}

#[test]
fn test_filesystem_names() {
    let fixture = fixture();
    let engine = fixture.engine();
    assert_eq!(engine.render("page", Map::new()).unwrap(), "page:<i></i>");
    assert_eq!(engine.render("page.twig", Map::new()).unwrap(), "page:<i></i>");
    assert_eq!(engine.render("@custom/widget", Map::new()).unwrap(), "W");
    assert_eq!(
        engine.render("@atoms/01-icon.twig", context(json!({"icon": "*"}))).unwrap(),
        "<i>*</i>"
    );
    assert!(!engine.resolver().exists("@atoms/../../_macros/forms.macro"));
}

#[test]
fn test_inline_text_is_last_resort() {
    let fixture = fixture();
    let engine = fixture.engine();
    assert_eq!(
        engine.render("Hi {{ who }}", context(json!({"who": "there"}))).unwrap(),
        "Hi there"
    );
    match engine.render("atoms-ghost", Map::new()) {
        Err(EngineError::Load(err)) => assert!(err.is_not_found()),
        other => panic!("Expected not found, got {:?}", other),
    }
}

#[test]
fn test_bound_include_data_overrides_context() {
    let fixture = fixture();
    let engine = fixture.engine();
    let output = engine
        .render_string(
            r#"{% include "test-vars" %}"#,
            context(json!({"a": 0, "b": 2})),
        )
        .unwrap();
    assert_eq!(output, "a=1 b=2 c=");
}

#[test]
fn test_bound_include_variables_override_data() {
    let fixture = fixture();
    let engine = fixture.engine();
    let output = engine
        .render_string(
            r#"{% include "test-vars" with {c: 3} %}"#,
            context(json!({"a": 0})),
        )
        .unwrap();
    assert_eq!(output, "a=1 b= c=3");
}

// Isolation discards bound data together with the context. This mirrors the
// plain `only` behaviour and is kept as is.
#[test]
fn test_isolated_bound_include_drops_data() {
    let fixture = fixture();
    let engine = fixture.engine();
    let ctx = || context(json!({"a": 0, "b": 2}));
    assert_eq!(
        engine.render_string(r#"{% include "test-vars" only %}"#, ctx()).unwrap(),
        "a= b= c="
    );
    assert_eq!(
        engine
            .render_string(r#"{% include "test-vars" with {c: 3} only %}"#, ctx())
            .unwrap(),
        "a= b= c=3"
    );
}

#[test]
fn test_include_without_data_is_plain() {
    let fixture = fixture();
    let engine = fixture.engine();
    assert_eq!(
        engine
            .render_string(r#"{% include "test-nodata" %}"#, context(json!({"x": 5})))
            .unwrap(),
        "x=5"
    );
    assert_eq!(
        engine
            .render_string(r#"{% include "test-nodata" only %}"#, context(json!({"x": 5})))
            .unwrap(),
        "x="
    );
}

#[test]
fn test_dynamic_targets_are_not_bound() {
    let fixture = fixture();
    let engine = fixture.engine();
    let output = engine
        .render_string(
            r#"{% set name = "atoms-button" %}{% include name %}"#,
            context(json!({"label": "ctx"})),
        )
        .unwrap();
    assert_eq!(output, r#"<button class="normal">ctx</button>"#);
}

#[test]
fn test_data_bound_by_namespaced_reference() {
    let fixture = fixture();
    let engine = fixture.engine();
    assert_eq!(
        engine
            .render_string(r#"{% include "@atoms/00-button.twig" %}"#, Map::new())
            .unwrap(),
        r#"<button class="small">Go</button>"#
    );
}

#[test]
fn test_bound_embed_overrides_blocks() {
    let fixture = fixture();
    let engine = fixture.engine();
    let output = engine
        .render_string(
            r#"{% embed "molecules-card" %}{% block body %}<p>{{ title }}</p>{% endblock %}{% endembed %}"#,
            context(json!({"title": "Page"})),
        )
        .unwrap();
    assert_eq!(output, r#"<div class="card"><h2>Card</h2><p>Card</p></div>"#);

    let isolated = engine
        .render_string(
            r#"{% embed "molecules-card" with {title: "Own"} only %}{% endembed %}"#,
            context(json!({"title": "Page"})),
        )
        .unwrap();
    assert_eq!(isolated, r#"<div class="card"><h2>Own</h2></div>"#);
}

#[test]
fn test_layout_embed() {
    let fixture = fixture();
    let engine = fixture.engine();
    assert_eq!(
        engine
            .render_string(
                r#"{% embed "base.twig" %}{% block content %}{% include "atoms-button" %}{% endblock %}{% endembed %}"#,
                Map::new(),
            )
            .unwrap(),
        r#"<html><button class="small">Go</button></html>"#
    );
}

#[test]
fn test_rewrite_is_idempotent() {
    let fixture = fixture();
    let engine = fixture.engine();
    let template = parse(
        r#"{% include "atoms-button" %}{% embed "molecules-card" only %}{% block body %}{% include "test-vars" with {c: 1} %}{% endblock %}{% endembed %}{% include "test-nodata" %}"#,
    )
    .unwrap();
    let once = engine.rewrite(template);
    let twice = engine.rewrite(once.clone());
    assert_eq!(once, twice);
}

#[test]
fn test_emitted_arguments() {
    let fixture = fixture();
    let engine = fixture.engine();
    let program = engine
        .compile_string(
            r#"{% include "atoms-button" with {size: "big"} only %}{% include "atoms-button" %}{% include "test-nodata" with {x: 1} %}"#,
        )
        .unwrap();
    let emitted = program.to_string();
    assert!(emitted.contains(r#"include "atoms-button" with {size: "big"}"#), "{}", emitted);
    assert!(
        emitted.contains(r#"include "atoms-button" with merge(context, {"label":"Go","size":"small"})"#),
        "{}",
        emitted
    );
    assert!(emitted.contains(r#"include "test-nodata" with merge(context, {x: 1})"#), "{}", emitted);
}

#[test]
fn test_macros_from_library_directory() {
    let fixture = fixture();
    let engine = fixture.engine();
    assert_eq!(engine.macros().names().collect::<Vec<_>>(), vec!["forms", "ui"]);
    assert_eq!(
        engine
            .render_string(r#"{{ forms.button("<Go>") }}"#, Map::new())
            .unwrap(),
        "<b>&lt;Go&gt;</b>"
    );
}

#[test]
fn test_includes_inside_macros_are_bound() {
    let fixture = fixture();
    let engine = fixture.engine();
    assert_eq!(
        engine.render_string("{{ ui.btn() }}", Map::new()).unwrap(),
        r#"<button class="small">Go</button>"#
    );

    let mut store = MemoryDataStore::new();
    store.insert("atoms-button", context(json!({"label": "Other"})));
    let engine = engine.with_data_store(store);
    assert_eq!(
        engine.render_string("{{ ui.btn() }}", Map::new()).unwrap(),
        r#"<button class="normal">Other</button>"#
    );
}

#[test]
fn test_extensions_from_components_directory() {
    let fixture = fixture();
    let engine = fixture.engine();
    let loaded: Vec<_> = engine
        .extensions()
        .loaded()
        .iter()
        .map(|s| (s.kind.to_string(), s.name.clone()))
        .collect();
    assert_eq!(
        loaded,
        vec![
            ("filter".to_string(), "slugify".to_string()),
            ("function".to_string(), "pl_example".to_string()),
            ("tag".to_string(), "spaceless".to_string()),
            ("test".to_string(), "url".to_string()),
        ]
    );
    assert_eq!(
        engine
            .render_string(
                "{{ 'Hello World'|slugify }}{% spaceless %}<p> </p> <i></i>{% endspaceless %}{% if 'https://a.b' is url %}u{% endif %}",
                Map::new(),
            )
            .unwrap(),
        "hello-world<p></p><i></i>u"
    );
    assert!(engine
        .render_string("{{ 'x'|wordcount }}", Map::new())
        .is_err());
}

#[test]
fn test_host_registered_filter() {
    let fixture = fixture();
    let mut engine = fixture.engine();
    engine
        .extensions_mut()
        .add_filter("shout", |v, _| Ok(json!(format!("{}!", v.as_str().unwrap_or_default()))));
    assert_eq!(
        engine.render_string("{{ 'hey'|shout }}", Map::new()).unwrap(),
        "hey!"
    );
}

#[test]
fn test_missing_include_reports_name() {
    let fixture = fixture();
    let engine = fixture.engine();
    let err = engine
        .render_string(r#"{% include "atoms-nope" %}"#, Map::new())
        .unwrap_err();
    match &err {
        EngineError::Render {
            source: RenderError::Include { name, .. },
            ..
        } => assert_eq!(name, "atoms-nope"),
        other => panic!("Expected include error, got {:?}", other),
    }
    assert_eq!(
        engine
            .render_string(r#"{% include "atoms-nope" ignore missing %}ok"#, Map::new())
            .unwrap(),
        "ok"
    );
}

#[test]
fn test_config_file_globals() {
    let fixture = fixture();
    let root = fixture.source.parent().unwrap();
    let config_path = root.join("engine.toml");
    write(
        &config_path,
        "source_dir = \"source\"\ntemplate_dirs = [\"templates\"]\n\n[globals]\nsite = \"Lab\"\n",
    );
    let engine = Engine::new(EngineConfig::from_file(&config_path).unwrap()).unwrap();
    assert_eq!(
        engine
            .render_string(r#"{{ site }}:{% include "page" %}"#, Map::new())
            .unwrap(),
        "Lab:page:<i></i>"
    );
}
