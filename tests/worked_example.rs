use std::fs;

use serde_json::json;
use sifter::{Context, MemoryLoader, Sifter};

const TEMPLATE: &str = "\
foo = {foo}
<!--@IF(condition=='true')-->
OK
<!--@END_IF-->
<!--@LOOP(array)-->
loop = {loop}
<!--@END_LOOP-->
";

const EXPECTED: &str = "\
foo = bar
OK
loop = 1
loop = 2
loop = 3
";

fn fill(sifter: &mut Sifter) {
    sifter.set_var("foo", "bar");
    sifter.set_var("condition", "true");
    sifter.set_var(
        "array",
        vec![
            sifter::record([("loop", 1)]),
            sifter::record([("loop", 2)]),
            sifter::record([("loop", 3)]),
        ],
    );
}

#[test]
fn worked_example_from_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("example.html");
    fs::write(&path, TEMPLATE).unwrap();

    let mut sifter = Sifter::new();
    fill(&mut sifter);
    assert_eq!(sifter.fetch(&path).unwrap(), EXPECTED);
}

#[test]
fn worked_example_from_json_context() {
    let mut sifter = Sifter::with_loader(MemoryLoader::new().with("example.html", TEMPLATE));
    *sifter.context_mut() = Context::from_json(json!({
        "foo": "bar",
        "condition": "true",
        "array": [{"loop": 1}, {"loop": 2}, {"loop": 3}],
    }));
    assert_eq!(sifter.fetch("example.html").unwrap(), EXPECTED);
}

#[test]
fn compiled_template_is_reusable() {
    let mut sifter = Sifter::with_loader(MemoryLoader::new());
    fill(&mut sifter);
    let template = sifter.compile_str("example.html", TEMPLATE).unwrap();
    assert_eq!(sifter.render_to_string(&template).unwrap(), EXPECTED);

    sifter.set_var("condition", "false");
    sifter.set_var_raw("array", Vec::<sifter::Value>::new());
    assert_eq!(sifter.render_to_string(&template).unwrap(), "foo = bar\n");
}
