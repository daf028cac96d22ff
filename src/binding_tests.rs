//! End-to-end binding tests: module lowering followed by runtime construction.

#[cfg(test)]
mod tests {
    use crate::pipeline::{lower_module, LoweringOptions, ModuleOutput};
    use crate::runtime::ViewRuntime;
    use crate::validate::{
        ErrorKind, SourceModule, INV_BINDING_SHAPE, INV_UNRESOLVED_BINDING,
    };
    use serde_json::{json, Value};

    fn lower(value: Value) -> ModuleOutput {
        let module: SourceModule = serde_json::from_value(value).unwrap();
        lower_module(&module, &LoweringOptions::default())
    }

    fn runtime_for(value: Value) -> ViewRuntime {
        let output = lower(value);
        assert!(output.is_success(), "{:?}", output.errors().collect::<Vec<_>>());
        ViewRuntime::from_output(&output)
    }

    fn text(arg: &str) -> Value {
        json!({ "type": "element", "name": "Text", "args": [{ "value": arg }] })
    }

    fn child(name: &str, args: Value) -> Value {
        json!({ "type": "element", "name": name, "args": args })
    }

    // ═══════════════════════════════════════════════════════════════════════════════
    // TWO-WAY
    // ═══════════════════════════════════════════════════════════════════════════════

    fn two_way_module() -> Value {
        json!({
            "filePath": "counter.ets",
            "components": [
                {
                    "name": "Parent",
                    "isEntry": true,
                    "members": [{ "member": "field", "name": "count", "decorator": { "kind": "state" }, "initializer": "10" }],
                    "render": { "body": [{
                        "type": "element",
                        "name": "Column",
                        "children": [
                            child("Child", json!([{ "name": "value", "value": "$count" }])),
                            text("this.count")
                        ]
                    }]}
                },
                {
                    "name": "Child",
                    "members": [{ "member": "field", "name": "value", "decorator": { "kind": "link" } }],
                    "render": { "body": [text("this.value")] }
                }
            ]
        })
    }

    #[test]
    fn test_two_way_write_reaches_parent() {
        let runtime = runtime_for(two_way_module());
        let mut parent = runtime.mount("Parent").unwrap();

        {
            let child = parent.child("Child").unwrap();
            assert_eq!(child.get("value"), Some(json!(10)));
            assert!(child
                .wrapper("value")
                .unwrap()
                .is_linked_with(parent.wrapper("count").unwrap()));

            let before = parent.rerender_requests();
            assert!(child.set("value", json!(20)));
            assert_eq!(parent.get("count"), Some(json!(20)));
            assert!(parent.rerender_requests() > before);
        }

        parent.set("count", json!(30));
        assert_eq!(parent.child("Child").unwrap().get("value"), Some(json!(30)));

        runtime.update(&mut parent).unwrap();
        let tree = parent.tree().unwrap();
        assert_eq!(tree.count("Text"), 2);
        let column = tree.find("Column").unwrap();
        let parent_text = column.children.iter().find(|n| n.name == "Text").unwrap();
        assert_eq!(parent_text.args, vec![json!(30)]);
    }

    #[test]
    fn test_two_way_requires_sigil_reference() {
        let mut module = two_way_module();
        module["components"][0]["render"]["body"][0]["children"][0]["args"][0]["value"] =
            json!("this.count");
        let output = lower(module);
        let err = output.get("Parent").unwrap().error().unwrap();
        assert_eq!(err.code, INV_BINDING_SHAPE);
        assert!(output.get("Child").unwrap().lowered().is_some());
    }

    #[test]
    fn test_two_way_without_argument_is_unresolved() {
        let mut module = two_way_module();
        module["components"][0]["render"]["body"][0]["children"][0]["args"] = json!([]);
        let err = lower(module).errors().next().cloned().unwrap();
        assert_eq!(err.code, INV_UNRESOLVED_BINDING);
        assert_eq!(err.component(), Some("Parent"));
    }

    #[test]
    fn test_two_way_to_undecorated_field_is_unresolved() {
        let mut module = two_way_module();
        module["components"][0]["members"] =
            json!([{ "member": "field", "name": "count", "initializer": "10" }]);
        let err = lower(module).errors().next().cloned().unwrap();
        assert_eq!(err.kind(), ErrorKind::UnresolvedBinding);
    }

    // ═══════════════════════════════════════════════════════════════════════════════
    // ONE-WAY
    // ═══════════════════════════════════════════════════════════════════════════════

    fn one_way_module() -> Value {
        json!({
            "components": [
                {
                    "name": "Page",
                    "isEntry": true,
                    "members": [{ "member": "field", "name": "title", "decorator": { "kind": "state" }, "initializer": "'A'" }],
                    "render": { "body": [child("Banner", json!([{ "value": "this.title" }]))] }
                },
                {
                    "name": "Banner",
                    "members": [{ "member": "field", "name": "label", "decorator": { "kind": "prop" } }],
                    "render": { "body": [text("'Title: ' + this.label")] }
                }
            ]
        })
    }

    #[test]
    fn test_one_way_write_stays_local() {
        let runtime = runtime_for(one_way_module());
        let page = runtime.mount("Page").unwrap();
        let banner = page.child("Banner").unwrap();

        assert_eq!(banner.get("label"), Some(json!("A")));
        assert!(!banner
            .wrapper("label")
            .unwrap()
            .is_linked_with(page.wrapper("title").unwrap()));

        banner.set("label", json!("B"));
        assert_eq!(page.get("title"), Some(json!("A")));
        assert_eq!(banner.get("label"), Some(json!("B")));
    }

    #[test]
    fn test_one_way_refreshes_on_parent_render() {
        let runtime = runtime_for(one_way_module());
        let mut page = runtime.mount("Page").unwrap();

        page.set("title", json!("C"));
        assert_eq!(page.child("Banner").unwrap().get("label"), Some(json!("A")));

        runtime.update(&mut page).unwrap();
        let banner = page.child("Banner").unwrap();
        assert_eq!(banner.get("label"), Some(json!("C")));
        assert_eq!(banner.render_count(), 2);
        let label = page.tree().unwrap().find("Text").unwrap();
        assert_eq!(label.args, vec![json!("Title: C")]);
    }

    #[test]
    fn test_one_way_rejects_sigil_reference() {
        let mut module = one_way_module();
        module["components"][0]["render"]["body"][0]["args"][0]["value"] = json!("$title");
        let err = lower(module).errors().next().cloned().unwrap();
        assert_eq!(err.code, INV_BINDING_SHAPE);
    }

    // ═══════════════════════════════════════════════════════════════════════════════
    // SHARED (PROVIDE / CONSUME)
    // ═══════════════════════════════════════════════════════════════════════════════

    fn shared_module() -> Value {
        json!({
            "components": [
                {
                    "name": "App",
                    "isEntry": true,
                    "members": [{
                        "member": "field",
                        "name": "theme",
                        "decorator": { "kind": "provide", "key": "appTheme" },
                        "initializer": "'light'"
                    }],
                    "render": { "body": [child("Mid", json!([]))] }
                },
                {
                    "name": "Mid",
                    "members": [{ "member": "field", "name": "theme", "decorator": { "kind": "consume", "key": "appTheme" } }],
                    "render": { "body": [child("Leaf", json!([]))] }
                },
                {
                    "name": "Leaf",
                    "members": [{ "member": "field", "name": "color", "decorator": { "kind": "consume", "key": "appTheme" } }],
                    "render": { "body": [text("this.color")] }
                }
            ]
        })
    }

    #[test]
    fn test_shared_value_fans_out_to_all_consumers() {
        let runtime = runtime_for(shared_module());
        let app = runtime.mount("App").unwrap();
        let mid = app.child("Mid").unwrap();
        let leaf = mid.child("Leaf").unwrap();
        assert_eq!(leaf.get("color"), Some(json!("light")));

        let mid_before = mid.rerender_requests();
        let leaf_before = leaf.rerender_requests();
        app.set("theme", json!("dark"));
        assert_eq!(mid.get("theme"), Some(json!("dark")));
        assert_eq!(leaf.get("color"), Some(json!("dark")));
        assert_eq!(mid.rerender_requests(), mid_before + 1);
        assert_eq!(leaf.rerender_requests(), leaf_before + 1);

        leaf.set("color", json!("blue"));
        assert_eq!(app.get("theme"), Some(json!("blue")));
    }

    #[test]
    fn test_provided_keys_are_reported() {
        let output = lower(shared_module());
        let app = output.get("App").unwrap().lowered().unwrap();
        assert_eq!(app.provided, vec!["appTheme".to_string()]);
    }

    #[test]
    fn test_consumer_without_ancestor_provider() {
        let output = lower(json!({
            "components": [
                {
                    "name": "Root",
                    "isEntry": true,
                    "render": { "body": [child("Island", json!([])), child("Orphan", json!([]))] }
                },
                {
                    "name": "Island",
                    "members": [{ "member": "field", "name": "k", "decorator": { "kind": "provide" }, "initializer": "1" }],
                    "render": { "body": [] }
                },
                {
                    "name": "Orphan",
                    "members": [{ "member": "field", "name": "k", "decorator": { "kind": "consume" } }],
                    "render": { "body": [] }
                }
            ]
        }));
        let err = output.get("Orphan").unwrap().error().unwrap();
        assert_eq!(err.code, INV_UNRESOLVED_BINDING);
        assert!(output.get("Root").unwrap().lowered().is_some());
        assert!(output.get("Island").unwrap().lowered().is_some());
    }

    #[test]
    fn test_consumer_binds_to_nearest_provider() {
        let runtime = runtime_for(json!({
            "components": [
                {
                    "name": "Root",
                    "isEntry": true,
                    "members": [{ "member": "field", "name": "k", "decorator": { "kind": "provide" }, "initializer": "'outer'" }],
                    "render": { "body": [child("Mid", json!([]))] }
                },
                {
                    "name": "Mid",
                    "members": [{ "member": "field", "name": "k", "decorator": { "kind": "provide" }, "initializer": "'inner'" }],
                    "render": { "body": [child("Leaf", json!([]))] }
                },
                {
                    "name": "Leaf",
                    "members": [{ "member": "field", "name": "k", "decorator": { "kind": "consume" } }],
                    "render": { "body": [text("this.k")] }
                }
            ]
        }));
        let root = runtime.mount("Root").unwrap();
        let mid = root.child("Mid").unwrap();
        let leaf = mid.child("Leaf").unwrap();
        assert_eq!(leaf.get("k"), Some(json!("inner")));
        assert!(leaf.wrapper("k").unwrap().is_linked_with(mid.wrapper("k").unwrap()));
        assert!(!leaf.wrapper("k").unwrap().is_linked_with(root.wrapper("k").unwrap()));

        leaf.set("k", json!("changed"));
        assert_eq!(mid.get("k"), Some(json!("changed")));
        assert_eq!(root.get("k"), Some(json!("outer")));
    }

    fn cycle_components() -> (Value, Value) {
        let a = json!({
            "name": "A",
            "members": [{ "member": "field", "name": "k", "decorator": { "kind": "provide" }, "initializer": "1" }],
            "render": { "body": [child("B", json!([]))] }
        });
        let b = json!({
            "name": "B",
            "members": [{ "member": "field", "name": "k", "decorator": { "kind": "consume" } }],
            "render": { "body": [child("A", json!([]))] }
        });
        (a, b)
    }

    #[test]
    fn test_cycle_resolution_ignores_declaration_order() {
        let (a, b) = cycle_components();
        let forward = lower(json!({ "components": [a.clone(), b.clone()] }));
        let reversed = lower(json!({ "components": [b, a] }));

        for output in [&forward, &reversed] {
            assert!(output.get("A").unwrap().lowered().is_some());
            let err = output.get("B").unwrap().error().unwrap();
            assert_eq!(err.code, INV_UNRESOLVED_BINDING);
        }
    }

    #[test]
    fn test_call_site_argument_for_consumer_is_dropped() {
        let mut module = shared_module();
        module["components"][0]["render"]["body"][0]["args"] =
            json!([{ "name": "theme", "value": "'ignored'" }]);
        let output = lower(module);
        assert!(output.is_success());

        let runtime = ViewRuntime::from_output(&output);
        let app = runtime.mount("App").unwrap();
        assert_eq!(app.child("Mid").unwrap().get("theme"), Some(json!("light")));
    }
}
