mod common;

use arbor::xslt::{ContextItem, ExprValue, Expression, PathExpr};
use arbor::{
    ArborError, Controller, Diagnostics, ModeId, OutputMethod, ParameterSet, RecoveryPolicy, TransformConfig,
    handler_fn, load_config, transform_file, transform_str,
};
use arbor_tree::{Axis, NodeKind, NodeTest, TextOutputter};
use arbor_xslt::Value;
use common::{CollectingListener, TestResult, init_logging, new_stylesheet, parse};
use std::cell::RefCell;
use std::fs;
use std::rc::Rc;
use std::sync::Arc;

#[test]
fn test_rules_rename_elements_and_fall_back_to_built_ins() -> TestResult {
    init_logging();
    let mut stylesheet = new_stylesheet();
    stylesheet.add_template(
        "/",
        Arc::new(handler_fn(|ctx, c| {
            c.outputter()?.start_element("html")?;
            c.apply_templates(ctx, None, ctx.mode(), None)?;
            c.outputter()?.end_element()?;
            Ok(())
        })),
        ModeId::Default,
        0,
        None,
    )?;
    stylesheet.add_template(
        "section/title",
        Arc::new(handler_fn(|ctx, c| {
            c.outputter()?.start_element("h1")?;
            c.apply_templates(ctx, None, ctx.mode(), None)?;
            c.outputter()?.end_element()?;
            Ok(())
        })),
        ModeId::Default,
        0,
        None,
    )?;
    stylesheet.add_template(
        "comment() | processing-instruction()",
        Arc::new(handler_fn(|_, c| {
            c.outputter()?.characters("#")?;
            Ok(())
        })),
        ModeId::Default,
        0,
        None,
    )?;

    let source = "<doc><section><title>Intro</title>Body<!--c--></section><title>Loose</title></doc>";
    let html = transform_str(&stylesheet, source, OutputMethod::Xml, &TransformConfig::default())?;
    assert_eq!(html, "<html><h1>Intro</h1>Body#Loose</html>");
    Ok(())
}

#[test]
fn test_ambiguity_warning_names_both_rules() -> TestResult {
    init_logging();
    let mut stylesheet = new_stylesheet();
    stylesheet.set_location("style.xsl", 3);
    stylesheet.add_template("item", Arc::new(handler_fn(|_, _| Ok(()))), ModeId::Default, 0, None)?;
    stylesheet.set_location("style.xsl", 7);
    stylesheet.add_template("item", Arc::new(handler_fn(|_, _| Ok(()))), ModeId::Default, 0, None)?;
    let doc = parse(&stylesheet, "<list><item/><item/></list>")?;

    let listener = Arc::new(CollectingListener::default());
    let diagnostics = Diagnostics::new(RecoveryPolicy::RecoverWithWarnings, listener.clone());
    let mut controller = Controller::new(&stylesheet, diagnostics);
    controller.transform_document(&doc)?;

    let messages = listener.messages();
    assert_eq!(messages.len(), 2);
    assert_eq!(
        messages[1],
        "Ambiguous rule match for /list[1]/item[2]\n\
         Matches both \"item\" on line 7 of style.xsl\n\
         and \"item\" on line 3 of style.xsl"
    );

    let config = TransformConfig {
        recovery_policy: RecoveryPolicy::DoNotRecover,
        ..TransformConfig::default()
    };
    let err = transform_str(&stylesheet, "<item/>", OutputMethod::Text, &config).unwrap_err();
    assert!(matches!(err, ArborError::Xslt(_)));
    Ok(())
}

#[test]
fn test_preview_from_configuration() -> TestResult {
    init_logging();
    let mut stylesheet = new_stylesheet();
    let preview = stylesheet.mode_id(Some("flush"))?;
    stylesheet.add_template(
        "entry",
        Arc::new(handler_fn(|ctx, c| {
            ctx.current_node().copy_to(c.outputter()?)?;
            Ok(())
        })),
        preview,
        0,
        None,
    )?;
    // Entries reaching the main pass have lost their content.
    stylesheet.add_template(
        "entry",
        Arc::new(handler_fn(|ctx, c| {
            let empty = !ctx.current_node().has_child_nodes();
            c.outputter()?.characters(if empty { "." } else { "!" })?;
            Ok(())
        })),
        ModeId::Default,
        0,
        None,
    )?;
    let config = TransformConfig::from_json(r#"{ "preview_mode": "flush", "preview_elements": ["entry"] }"#)?;
    stylesheet.configure_preview(&config)?;

    let log = "<log><entry n='1'>a</entry><entry n='2'>b</entry></log>";
    let xml = transform_str(&stylesheet, log, OutputMethod::Xml, &config)?;
    assert_eq!(xml, r#"<entry n="1">a</entry><entry n="2">b</entry>.."#);
    Ok(())
}

#[test]
fn test_transform_file_with_config_file() -> TestResult {
    init_logging();
    let dir = tempfile::tempdir()?;
    let input = dir.path().join("in.xml");
    let output = dir.path().join("out.txt");
    let config_path = dir.path().join("config.json");
    fs::write(&input, "<r>\n  <a>one</a>\n  <b>two</b>\n</r>")?;
    fs::write(&config_path, r#"{ "strip_whitespace": true, "line_numbering": true }"#)?;

    let config = load_config(&config_path)?;
    assert!(config.strip_whitespace);
    let stylesheet = new_stylesheet();
    transform_file(&stylesheet, &input, &output, OutputMethod::Text, &config)?;
    assert_eq!(fs::read_to_string(&output)?, "onetwo");

    fs::write(&config_path, "{ not json")?;
    assert!(matches!(load_config(&config_path), Err(ArborError::Config(_))));
    assert!(matches!(
        transform_file(&stylesheet, dir.path().join("missing.xml"), &output, OutputMethod::Text, &config),
        Err(ArborError::Io(_))
    ));
    Ok(())
}

#[test]
fn test_selected_nodes_with_parameters_and_globals() -> TestResult {
    init_logging();
    let mut stylesheet = new_stylesheet();
    let item = stylesheet.fingerprint_of("item")?;
    let name_attr = stylesheet.fingerprint_of("name")?;
    let prefix = stylesheet.declare_global("prefix", true, Some(Arc::new(ExprValue(Arc::new(ContextItem)))))?;
    let sep = Arc::new(stylesheet.local_binding("sep", 0, true, None)?);
    let sep_name = sep.fingerprint;

    stylesheet.add_template(
        "list",
        Arc::new(handler_fn(move |ctx, c| {
            let select = PathExpr::new().step(Axis::Child, NodeTest::Name {
                kind: NodeKind::Element,
                fingerprint: item,
            });
            let mut params = ParameterSet::new();
            params.put(sep_name, Value::from(";"));
            c.apply_templates(ctx, Some(select.enumerate(ctx)?), ctx.mode(), Some(&params))
        })),
        ModeId::Default,
        0,
        None,
    )?;
    stylesheet.add_template(
        "item",
        Arc::new(
            handler_fn(move |ctx, c| {
                let prefix = c.evaluate_global(&prefix)?.as_string();
                let sep = c.evaluate_local(&sep, ctx)?.as_string();
                let name = ctx.current_node().attribute_value(name_attr).unwrap_or("?");
                let text = format!("{prefix}{name}{sep}");
                c.outputter()?.characters(&text)?;
                Ok(())
            })
            .with_stack_frame(),
        ),
        ModeId::Default,
        0,
        None,
    )?;

    let doc = parse(&stylesheet, "<list><item name='a'/>skipped<item name='b'/></list>")?;
    let out = Rc::new(RefCell::new(TextOutputter::new()));
    let mut controller = Controller::new(&stylesheet, Diagnostics::default());
    let mut globals = ParameterSet::new();
    globals.put(stylesheet.fingerprint_of("prefix")?, Value::from("-"));
    controller.set_global_parameters(globals);
    controller.set_outputter(Box::new(out.clone()));
    controller.transform_document(&doc)?;
    assert_eq!(out.borrow().as_str(), "-a;-b;");
    assert_eq!(controller.bindery().get_frame_id(), 0);
    Ok(())
}

#[test]
fn test_key_and_id_patterns_in_rules() -> TestResult {
    init_logging();
    let mut stylesheet = new_stylesheet();
    let kind = stylesheet.fingerprint_of("kind")?;
    stylesheet.add_key(
        "by-kind",
        "part",
        Arc::new(PathExpr::new().step(Axis::Attribute, NodeTest::Name {
            kind: NodeKind::Attribute,
            fingerprint: kind,
        })),
    )?;
    let mark = |label: &'static str| {
        Arc::new(handler_fn(move |ctx, c| {
            let text = format!("{label}:{} ", ctx.current_node().string_value());
            c.outputter()?.characters(&text)?;
            Ok(())
        }))
    };
    stylesheet.add_template("key('by-kind', 'bolt')", mark("bolt"), ModeId::Default, 0, None)?;
    stylesheet.add_template("id('main')", mark("main"), ModeId::Default, 0, None)?;
    stylesheet.add_template("part", mark("part"), ModeId::Default, 0, None)?;
    stylesheet.add_template(
        "text()",
        Arc::new(handler_fn(|_, _| Ok(()))),
        ModeId::Default,
        0,
        None,
    )?;

    let source = "<kit><part kind='nut'>n1</part><part kind='bolt'>b1</part>\
                  <part xml:id='main' kind='nut'>n2</part></kit>";
    let text = transform_str(&stylesheet, source, OutputMethod::Text, &TransformConfig::default())?;
    assert_eq!(text, "part:n1 bolt:b1 main:n2 ");
    Ok(())
}

#[test]
fn test_termination_is_reported_as_such() -> TestResult {
    init_logging();
    let mut stylesheet = new_stylesheet();
    stylesheet.add_template(
        "stop",
        Arc::new(handler_fn(|ctx, c| Err(c.terminate(ctx.current_node().string_value())))),
        ModeId::Default,
        0,
        None,
    )?;
    let err = transform_str(&stylesheet, "<r><stop>enough</stop></r>", OutputMethod::Text, &TransformConfig::default())
        .unwrap_err();
    assert!(err.is_termination());
    assert_eq!(err.to_string(), "Transformation failed: Processing terminated: enough");
    Ok(())
}
