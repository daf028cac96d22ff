//! View runtime tests over lowered modules.

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use crate::pipeline::{lower_module, LoweredComponent, LoweringOptions};
    use crate::runtime::{Activation, ViewRuntime};
    use crate::validate::{
        SourceModule, UiStatement, INV_UNBALANCED_TREE, INV_UNRESOLVED_BINDING,
        INV_UNSUPPORTED_NESTING,
    };
    use serde_json::{json, Value};

    fn lowered(value: Value) -> Vec<LoweredComponent> {
        let module: SourceModule = serde_json::from_value(value).unwrap();
        let output = lower_module(&module, &LoweringOptions::default());
        assert!(output.is_success(), "{:?}", output.errors().collect::<Vec<_>>());
        let lowered = output.lowered().cloned().collect();
        lowered
    }

    fn runtime_for(value: Value) -> ViewRuntime {
        ViewRuntime::new(lowered(value))
    }

    fn text(arg: &str) -> Value {
        json!({ "type": "element", "name": "Text", "args": [{ "value": arg }] })
    }

    fn state(name: &str, init: &str) -> Value {
        json!({ "member": "field", "name": name, "decorator": { "kind": "state" }, "initializer": init })
    }

    fn hello() -> Value {
        json!({
            "components": [{
                "name": "Hello",
                "isEntry": true,
                "members": [
                    state("message", "'Hello'"),
                    { "member": "field", "name": "visits", "initializer": "3" }
                ],
                "render": { "body": [{
                    "type": "element",
                    "name": "Column",
                    "children": [text("this.message")]
                }]}
            }]
        })
    }

    #[test]
    fn test_mount_renders_tree() {
        let runtime = runtime_for(hello());
        let view = runtime.mount("Hello").unwrap();
        assert_eq!(view.name(), "Hello");
        assert_eq!(view.render_count(), 1);

        let tree = view.tree().unwrap();
        assert_eq!(tree.name, "Hello");
        assert_eq!(tree.children.len(), 1);
        let column = &tree.children[0];
        assert_eq!(column.name, "Column");
        assert_eq!(column.children[0].args, vec![json!("Hello")]);
    }

    #[test]
    fn test_plain_field_never_requests_rerender() {
        let runtime = runtime_for(hello());
        let view = runtime.mount("Hello").unwrap();
        assert_eq!(view.get("visits"), Some(json!(3)));

        view.set("visits", json!(4));
        assert_eq!(view.get("visits"), Some(json!(4)));
        assert_eq!(view.rerender_requests(), 0);

        view.set("message", json!("Hi"));
        assert_eq!(view.rerender_requests(), 1);
        assert!(!view.set("missing", json!(1)));
    }

    #[test]
    fn test_mount_unknown_component() {
        let runtime = runtime_for(hello());
        let err = runtime.mount("Nope").unwrap_err();
        assert_eq!(err.code, INV_UNRESOLVED_BINDING);
    }

    // ═══════════════════════════════════════════════════════════════════════════════
    // BRANCH ACTIVATION
    // ═══════════════════════════════════════════════════════════════════════════════

    fn switcher() -> Value {
        json!({
            "components": [{
                "name": "Switcher",
                "members": [state("on", "true")],
                "render": { "body": [{
                    "type": "if",
                    "arms": [
                        { "condition": "this.on", "body": [text("'on'")] },
                        { "body": [text("'off'")] }
                    ]
                }]}
            }]
        })
    }

    #[test]
    fn test_branch_activation_sequence() {
        let runtime = runtime_for(switcher());
        let mut view = runtime.mount("Switcher").unwrap();
        assert_eq!(view.activations().len(), 1);
        assert_eq!(view.activations()[0].branch_id, Some(0));
        assert_eq!(view.activations()[0].activation, Activation::Initial);
        assert_eq!(view.active_branch(0), Some(0));

        runtime.update(&mut view).unwrap();
        assert_eq!(view.activations()[0].activation, Activation::Reuse);

        view.set("on", json!(false));
        runtime.update(&mut view).unwrap();
        assert_eq!(view.activations()[0].branch_id, Some(1));
        assert_eq!(view.activations()[0].activation, Activation::Rebuild);

        let tree = view.tree().unwrap();
        let conditional = tree.find("If").unwrap();
        assert_eq!(conditional.children.len(), 1);
        assert_eq!(conditional.children[0].branch_id, Some(1));
        assert_eq!(tree.find("Text").unwrap().args, vec![json!("off")]);
    }

    #[test]
    fn test_conditional_without_matching_arm() {
        let runtime = runtime_for(json!({
            "components": [{
                "name": "Hint",
                "members": [state("count", "0")],
                "render": { "body": [{
                    "type": "if",
                    "arms": [{ "condition": "this.count > 0", "body": [text("'positive'")] }]
                }]}
            }]
        }));
        let mut view = runtime.mount("Hint").unwrap();
        assert_eq!(view.activations()[0].branch_id, None);
        assert_eq!(view.active_branch(0), None);
        assert_eq!(view.tree().unwrap().count("Text"), 0);

        view.set("count", json!(2));
        runtime.update(&mut view).unwrap();
        assert_eq!(view.activations()[0].activation, Activation::Rebuild);
        assert_eq!(view.tree().unwrap().count("Text"), 1);
    }

    // ═══════════════════════════════════════════════════════════════════════════════
    // FOREACH AND CHILD INSTANCES
    // ═══════════════════════════════════════════════════════════════════════════════

    #[test]
    fn test_for_each_renders_each_item() {
        let runtime = runtime_for(json!({
            "components": [{
                "name": "Names",
                "members": [state("names", "['ann', 'bo', 'cy']")],
                "render": { "body": [{
                    "type": "element",
                    "name": "List",
                    "children": [{
                        "type": "for-each",
                        "source": "this.names",
                        "itemVar": "name",
                        "body": [text("'Item: ' + name")]
                    }]
                }]}
            }]
        }));
        let mut view = runtime.mount("Names").unwrap();
        let tree = view.tree().unwrap();
        assert_eq!(tree.count("Text"), 3);
        let items = &tree.find("ForEach").unwrap().children;
        let labels: Vec<&str> = items.iter().filter_map(|n| n.args[0].as_str()).collect();
        assert_eq!(labels, vec!["Item: ann", "Item: bo", "Item: cy"]);

        view.set("names", json!(["dee"]));
        runtime.update(&mut view).unwrap();
        assert_eq!(view.tree().unwrap().count("Text"), 1);
    }

    fn parent_with_optional_child() -> Value {
        json!({
            "components": [
                {
                    "name": "Shell",
                    "isEntry": true,
                    "members": [state("show", "true")],
                    "render": { "body": [{
                        "type": "if",
                        "arms": [{ "condition": "this.show", "body": [{ "type": "element", "name": "Counter" }] }]
                    }]}
                },
                {
                    "name": "Counter",
                    "members": [state("clicks", "0")],
                    "render": { "body": [text("this.clicks")] }
                }
            ]
        })
    }

    #[test]
    fn test_child_reused_across_renders_and_rebuilt_after_teardown() {
        let runtime = runtime_for(parent_with_optional_child());
        let mut shell = runtime.mount("Shell").unwrap();
        shell.child("Counter").unwrap().set("clicks", json!(5));

        runtime.update(&mut shell).unwrap();
        let counter = shell.child("Counter").unwrap();
        assert_eq!(counter.get("clicks"), Some(json!(5)));
        assert_eq!(counter.render_count(), 2);
        assert_eq!(shell.tree().unwrap().find("Text").unwrap().args, vec![json!(5)]);

        shell.set("show", json!(false));
        runtime.update(&mut shell).unwrap();
        assert!(shell.child("Counter").is_none());

        shell.set("show", json!(true));
        runtime.update(&mut shell).unwrap();
        let counter = shell.child("Counter").unwrap();
        assert_eq!(counter.get("clicks"), Some(json!(0)));
        assert_eq!(counter.render_count(), 1);
    }

    // ═══════════════════════════════════════════════════════════════════════════════
    // RE-ENTRANCY
    // ═══════════════════════════════════════════════════════════════════════════════

    #[test]
    fn test_reentrant_set_through_linked_child_is_queued() {
        let runtime = runtime_for(json!({
            "components": [
                {
                    "name": "Parent",
                    "isEntry": true,
                    "members": [state("count", "0")],
                    "render": { "body": [{ "type": "element", "name": "Child", "args": [{ "name": "value", "value": "$count" }] }] }
                },
                {
                    "name": "Child",
                    "members": [{ "member": "field", "name": "value", "decorator": { "kind": "link" } }],
                    "render": { "body": [] }
                }
            ]
        }));
        let parent = runtime.mount("Parent").unwrap();
        let child = parent.child("Child").unwrap();

        let child_wrapper = child.wrapper("value").unwrap().clone();
        let _bounce = parent.wrapper("count").unwrap().subscribe(move |v| {
            if *v == json!(1) {
                child_wrapper.set(json!(2));
            }
        });
        let seen = Rc::new(RefCell::new(Vec::new()));
        let log = Rc::clone(&seen);
        let _watch = child
            .wrapper("value")
            .unwrap()
            .subscribe(move |v| log.borrow_mut().push(v.clone()));

        parent.set("count", json!(1));
        assert_eq!(*seen.borrow(), vec![json!(1), json!(2)]);
        assert_eq!(parent.get("count"), Some(json!(2)));
        assert_eq!(child.get("value"), Some(json!(2)));
    }

    // ═══════════════════════════════════════════════════════════════════════════════
    // MALFORMED STREAMS
    // ═══════════════════════════════════════════════════════════════════════════════

    #[test]
    fn test_unbalanced_stream_is_rejected() {
        let mut components = lowered(hello());
        components[0].decl.render.body.pop();
        let runtime = ViewRuntime::new(components);
        let err = runtime.mount("Hello").unwrap_err();
        assert_eq!(err.code, INV_UNBALANCED_TREE);
    }

    #[test]
    fn test_mismatched_close_is_rejected() {
        let mut components = lowered(hello());
        let body = &mut components[0].decl.render.body;
        let last = body.len() - 1;
        body.swap(last - 1, last);
        let runtime = ViewRuntime::new(components);
        assert_eq!(runtime.mount("Hello").unwrap_err().code, INV_UNBALANCED_TREE);
    }

    #[test]
    fn test_declarative_form_is_rejected() {
        let mut components = lowered(hello());
        components[0].decl.render.body = vec![serde_json::from_value::<UiStatement>(text("'raw'")).unwrap()];
        let runtime = ViewRuntime::new(components);
        assert_eq!(runtime.mount("Hello").unwrap_err().code, INV_UNSUPPORTED_NESTING);
    }
}
