use serde_json::json;
use warpline_workflow::InputTemplate;

#[test]
fn renders_flat_and_nested_paths() {
    let template = InputTemplate::new("q={input} cat={nodes.classify.output}");
    let scope = json!({
        "input": "hello",
        "nodes": {"classify": {"output": "tech"}}
    });
    assert_eq!(template.render(&scope), "q=hello cat=tech");
}

#[test]
fn missing_paths_render_empty() {
    let template = InputTemplate::new("[{nodes.absent.output}]");
    assert_eq!(template.render(&json!({})), "[]");
}

#[test]
fn non_string_values_are_stringified() {
    let template = InputTemplate::new("n={count}");
    assert_eq!(template.render(&json!({"count": 3})), "n=3");
}

#[test]
fn dependencies_come_from_nodes_and_loop_last_references() {
    let template =
        InputTemplate::new("{input} {nodes.draft.output} {loop.last.review} {nodes.draft.output}");
    assert_eq!(template.node_dependencies(), vec!["draft", "review"]);
}

#[test]
fn plain_input_reference_has_no_dependencies() {
    let template = InputTemplate::new("{input} and {query}");
    assert!(template.node_dependencies().is_empty());
}

#[test]
fn hyphenated_node_ids_are_supported() {
    let template = InputTemplate::new("{nodes.stage-a.output}");
    assert_eq!(template.node_dependencies(), vec!["stage-a"]);
    let scope = json!({"nodes": {"stage-a": {"output": "val"}}});
    assert_eq!(template.render(&scope), "val");
}
