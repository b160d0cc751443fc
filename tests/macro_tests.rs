use weft::{
    CompileErrorKind, DocId, Document, Embedded, EmbeddedFn, Let, Line, Node, Program, Registry,
    RenderError, RenderErrorKind, Transform, Value, ValueType,
};
use weft_macros::weft_expr;

// ── Array expression: picks the first item ──────────────────────────────

#[weft_expr(source = "items[0]")]
fn first_item(items: Vec<Value>) -> Result<Value, RenderError> {
    items
        .into_iter()
        .next()
        .ok_or_else(|| RenderError::evaluation("empty array"))
}

// ── String expression: wraps text in brackets ───────────────────────────

#[weft_expr(source = "`[${text}]`")]
fn bracket(text: String) -> Result<Value, RenderError> {
    Ok(Value::String(format!("[{text}]")))
}

// ── Numeric expression: doubles a number ────────────────────────────────

#[weft_expr(source = "n * 2")]
fn double_number(n: f64) -> Result<Value, RenderError> {
    Ok(Value::Number(n * 2.0))
}

// ── Bool expression: "yes" or "no" ──────────────────────────────────────

#[weft_expr(source = "flag ? 'yes' : 'no'")]
fn yes_no(flag: bool) -> Result<Value, RenderError> {
    Ok(Value::String(if flag { "yes" } else { "no" }.to_string()))
}

// ── Multi-param expression ──────────────────────────────────────────────

#[weft_expr(source = "text.repeat(count)")]
fn repeat_text(text: String, count: f64) -> Result<Value, RenderError> {
    Ok(Value::String(text.repeat(count.round() as usize)))
}

// ── Transform expression: reads the rendered block ──────────────────────

#[weft_expr(source = "__block.trim().toUpperCase()")]
fn shout(__block: String) -> Result<Value, RenderError> {
    Ok(Value::String(__block.trim().to_uppercase()))
}

// ── Tests ───────────────────────────────────────────────────────────────

fn make_registry() -> Registry {
    let mut registry = Registry::new();
    registry.register(FirstItemExpr);
    registry.register(BracketExpr);
    registry.register(DoubleNumberExpr);
    registry.register(YesNoExpr);
    registry.register(RepeatTextExpr);
    registry.register(ShoutExpr);
    registry.register_fn("['alpha', 'beta']", |_| Ok(Value::from(vec!["alpha", "beta"])));
    registry.register_fn("'hello'", |_| Ok(Value::from("hello")));
    registry.register_fn("'ab'", |_| Ok(Value::from("ab")));
    registry.register_fn("21", |_| Ok(Value::Number(21.0)));
    registry.register_fn("3", |_| Ok(Value::Number(3.0)));
    registry.register_fn("true", |_| Ok(Value::Bool(true)));
    registry
}

fn line(children: Vec<Node>) -> Node {
    Line::new(children).into()
}

/// Binds each `(name, source)` pair around `body`, outermost first.
fn with_bindings(bindings: &[(&str, &str)], body: Vec<Node>) -> Document {
    let nodes = bindings.iter().rev().fold(body, |children, (name, source)| {
        vec![line(vec![Node::Let(Let {
            name: name.to_string(),
            expr: Some(Embedded::new(*source, &[])),
            children,
        })])]
    });
    Document::new(nodes)
}

fn render(document: Document) -> Result<String, weft::Error> {
    weft::render(&document, &make_registry())
}

#[test]
fn test_macro_array_expression() {
    let doc = with_bindings(
        &[("items", "['alpha', 'beta']")],
        vec![line(vec![Node::output("items[0]", &["items"])])],
    );
    assert_eq!(render(doc).unwrap(), "alpha");
}

#[test]
fn test_macro_string_expression() {
    let doc = with_bindings(
        &[("text", "'hello'")],
        vec![line(vec![Node::output("`[${text}]`", &["text"])])],
    );
    assert_eq!(render(doc).unwrap(), "[hello]");
}

#[test]
fn test_macro_number_expression() {
    let doc = with_bindings(
        &[("n", "21")],
        vec![line(vec![Node::output("n * 2", &["n"])])],
    );
    assert_eq!(render(doc).unwrap(), "42");
}

#[test]
fn test_macro_bool_expression() {
    let doc = with_bindings(
        &[("flag", "true")],
        vec![line(vec![Node::output("flag ? 'yes' : 'no'", &["flag"])])],
    );
    assert_eq!(render(doc).unwrap(), "yes");
}

#[test]
fn test_macro_multi_param_expression() {
    let doc = with_bindings(
        &[("text", "'ab'"), ("count", "3")],
        vec![line(vec![Node::output("text.repeat(count)", &["text", "count"])])],
    );
    assert_eq!(render(doc).unwrap(), "ababab");
}

#[test]
fn test_macro_type_validation_rejects_wrong_type() {
    // A number bound where a string is expected
    let doc = with_bindings(
        &[("text", "21")],
        vec![line(vec![Node::output("`[${text}]`", &["text"])])],
    );
    let weft::Error::Render(err) = render(doc).unwrap_err() else {
        panic!("expected a render error");
    };
    assert_eq!(err.kind, RenderErrorKind::TypeError);
    assert!(err.message.contains("string"));
}

#[test]
fn test_macro_params_must_be_declared() {
    // The fragment forgot to declare `count` as a free name
    let doc = with_bindings(
        &[("text", "'ab'"), ("count", "3")],
        vec![line(vec![Node::output("text.repeat(count)", &["text"])])],
    );
    let weft::Error::Compile(err) = render(doc).unwrap_err() else {
        panic!("expected a compile error");
    };
    assert_eq!(err.kind, CompileErrorKind::UndeclaredName);
    assert!(err.message.contains("count"));
}

#[test]
fn test_macro_signature() {
    let sig = RepeatTextExpr.signature();
    assert_eq!(sig.source, "text.repeat(count)");
    let params: Vec<_> = sig
        .params
        .iter()
        .map(|p| (p.name.as_str(), p.expected_type))
        .collect();
    assert_eq!(
        params,
        [("text", Some(ValueType::String)), ("count", Some(ValueType::Number))]
    );
    assert!(sig.params.iter().all(|p| p.required));
}

#[test]
fn test_macro_transform_expression() {
    let transform = Transform {
        expr: Embedded::new("__block.trim().toUpperCase()", &[weft::TRANSFORM_BINDING]),
        children: vec![
            line(vec![Node::literal("  quiet")]),
            Line::newline("\n").into(),
            line(vec![Node::literal("words  ")]),
        ],
    };
    let doc = Document::new(vec![line(vec![
        Node::literal("> "),
        Node::Transform(transform),
    ])]);
    assert_eq!(render(doc).unwrap(), "> QUIET\nWORDS");
}

#[test]
fn test_macro_expression_in_larger_document() {
    let doc = with_bindings(
        &[("n", "21"), ("text", "'hello'")],
        vec![
            line(vec![Node::literal("Result: "), Node::output("n * 2", &["n"])]),
            Line::newline("\n").into(),
            line(vec![Node::literal("and "), Node::output("`[${text}]`", &["text"])]),
        ],
    );
    let program = Program::compile(&[doc], &make_registry()).unwrap();
    assert_eq!(
        program.render_to_string(DocId(0)).unwrap(),
        "Result: 42\nand [hello]"
    );
}
