//! End-to-end compiler tests: source text in, object graph (or a typed
//! error) out.

use std::io::Write;
use std::sync::Arc;

use eiko_compiler::plugin::{PluginDef, PluginError, PluginParam};
use eiko_compiler::scope::Stored;
use eiko_compiler::types::Type;
use eiko_compiler::value::{DictKey, Value};
use eiko_compiler::{Compilation, CompileFailure, Compiler, Error, ExtensionRegistry};

fn compile(source: &str) -> Result<Compilation, CompileFailure> {
    Compiler::default().compile_source(source, None)
}

fn compile_ok(source: &str) -> Compilation {
    compile(source).unwrap_or_else(|failure| panic!("compilation failed:\n{}", failure.render()))
}

fn compile_err(source: &str) -> (CompileFailure, Error) {
    let failure = compile(source).err().expect("compilation should fail");
    let first = failure.errors.first().expect("at least one error").clone();
    (failure, first)
}

fn var(compilation: &Compilation, name: &str) -> Value {
    match compilation.entry_scope.get(name) {
        Some(Stored::Value(value)) => value,
        other => panic!("expected '{name}' to be a value, got {other:?}"),
    }
}

#[test]
fn evaluates_literals_and_arithmetic() {
    let compilation = compile_ok("a = 1 + 2 * 3\nb = 5 / 2\nc = 5 // 2\nd = 2 ** 10\n");
    assert_eq!(var(&compilation, "a"), Value::Int(7));
    assert_eq!(var(&compilation, "b"), Value::Float(2.5));
    assert_eq!(var(&compilation, "c"), Value::Int(2));
    assert_eq!(var(&compilation, "d"), Value::Int(1024));
}

#[test]
fn string_operations_and_fstrings() {
    let compilation = compile_ok(concat!(
        "name = \"web\" + \"-01\"\n",
        "line = \"ab\" * 3\n",
        "msg = f\"host {name} up {1 + 1}\"\n",
    ));
    assert_eq!(var(&compilation, "name"), Value::str("web-01"));
    assert_eq!(var(&compilation, "line"), Value::str("ababab"));
    assert_eq!(var(&compilation, "msg"), Value::str("host web-01 up 2"));
}

#[test]
fn reassignment_fails_with_position() {
    // Scenario: the second binding of `a` is the error, at line 2 col 1.
    let (failure, err) = compile_err("a = 1\na = 2\n");
    let Error::Reassign { name, span } = err else {
        panic!("expected a reassignment error, got {err}");
    };
    assert_eq!(name, "a");
    assert_eq!(failure.source_map.line_col(&span), (2, 1));
}

#[test]
fn forward_declaration_allows_exactly_one_write() {
    let compilation = compile_ok("a: int\na = 3\n");
    assert_eq!(var(&compilation, "a"), Value::Int(3));

    let (_, err) = compile_err("a: int\na = 3\na = 4\n");
    assert!(matches!(err, Error::Reassign { .. }));

    let (_, err) = compile_err("a: int\na = \"nope\"\n");
    assert!(matches!(err, Error::TypeMismatch { .. }));
}

#[test]
fn typedef_refinement_accepts_and_rejects() {
    let source = concat!(
        "typedef Port int if 1 <= self and self <= 65535\n",
        "resource S:\n",
        "    port: Port\n",
        "ok = S(8080)\n",
    );
    let compilation = compile_ok(source);
    let Value::Resource(resource) = var(&compilation, "ok") else {
        panic!("expected a resource");
    };
    assert_eq!(resource.get("port"), Some(Value::Int(8080)));

    let bad = concat!(
        "typedef Port int if 1 <= self and self <= 65535\n",
        "resource S:\n",
        "    port: Port\n",
        "bad = S(-1)\n",
    );
    let (_, err) = compile_err(bad);
    let Error::Refinement { type_name, .. } = err else {
        panic!("expected a refinement error, got {err}");
    };
    assert_eq!(type_name, "Port");
}

#[test]
fn typedef_is_callable_as_a_cast() {
    let compilation = compile_ok(concat!(
        "typedef Even int if self // 2 * 2 == self\n",
        "x = Even(12)\n",
    ));
    assert_eq!(var(&compilation, "x"), Value::Int(12));

    let (_, err) = compile_err(concat!(
        "typedef Even int if self // 2 * 2 == self\n",
        "x = Even(13)\n",
    ));
    assert!(matches!(err, Error::Refinement { .. }));
}

#[test]
fn resource_index_uses_first_property() {
    // Scenario: Wheel("Toyota", 7) gets index "Wheel-Toyota".
    let source = concat!(
        "resource Wheel:\n",
        "    brand: str\n",
        "    age: int\n",
        "w = Wheel(\"Toyota\", 7)\n",
    );
    let compilation = compile_ok(source);
    let Value::Resource(wheel) = var(&compilation, "w") else {
        panic!("expected a resource");
    };
    assert_eq!(wheel.index(), Some("Wheel-Toyota"));
    assert_eq!(wheel.get("age"), Some(Value::Int(7)));
    assert!(wheel.is_sealed());
}

#[test]
fn index_decorator_overrides_default() {
    let source = concat!(
        "@index([\"name\", \"port\"])\n",
        "resource Listener:\n",
        "    name: str\n",
        "    port: int\n",
        "l = Listener(\"api\", 443)\n",
    );
    let compilation = compile_ok(source);
    let Value::Resource(listener) = var(&compilation, "l") else {
        panic!("expected a resource");
    };
    assert_eq!(listener.index(), Some("Listener-api-443"));
}

#[test]
fn duplicate_index_is_rejected() {
    let source = concat!(
        "resource Wheel:\n",
        "    brand: str\n",
        "a = Wheel(\"Toyota\")\n",
        "b = Wheel(\"Toyota\")\n",
    );
    let (_, err) = compile_err(source);
    let Error::DuplicateIndex { def_name, index, .. } = err else {
        panic!("expected a duplicate index error, got {err}");
    };
    assert_eq!(def_name, "Wheel");
    assert_eq!(index, "Wheel-Toyota");
}

#[test]
fn default_values_and_keyword_arguments() {
    let source = concat!(
        "resource Host:\n",
        "    name: str\n",
        "    port: int = 22\n",
        "a = Host(\"db\")\n",
        "b = Host(name=\"web\", port=8080)\n",
    );
    let compilation = compile_ok(source);
    let Value::Resource(a) = var(&compilation, "a") else {
        panic!()
    };
    assert_eq!(a.get("port"), Some(Value::Int(22)));
    let Value::Resource(b) = var(&compilation, "b") else {
        panic!()
    };
    assert_eq!(b.get("port"), Some(Value::Int(8080)));
}

#[test]
fn missing_property_is_a_constructor_error() {
    let source = concat!(
        "resource Host:\n",
        "    name: str\n",
        "    port: int\n",
        "h = Host(\"db\")\n",
    );
    let (_, err) = compile_err(source);
    assert!(matches!(err, Error::Constructor { .. }), "got {err}");
}

#[test]
fn explicit_constructor_assigns_through_self() {
    let source = concat!(
        "resource Server:\n",
        "    name: str\n",
        "    port: int\n",
        "    def __init__(self, name: str, port: int = 80):\n",
        "        self.name = name\n",
        "        self.port = port\n",
        "s = Server(\"edge\")\n",
    );
    let compilation = compile_ok(source);
    let Value::Resource(server) = var(&compilation, "s") else {
        panic!()
    };
    assert_eq!(server.get("name"), Some(Value::str("edge")));
    assert_eq!(server.get("port"), Some(Value::Int(80)));
}

#[test]
fn constructor_property_reassignment_fails() {
    let source = concat!(
        "resource R:\n",
        "    x: int\n",
        "    def __init__(self, x: int):\n",
        "        self.x = x\n",
        "        self.x = x + 1\n",
        "r = R(1)\n",
    );
    let (_, err) = compile_err(source);
    assert!(matches!(err, Error::Reassign { .. }), "got {err}");
}

#[test]
fn ambiguous_overloads_require_constraints() {
    // Scenario: two same-shape overloads with no @constraint.
    let source = concat!(
        "resource Host:\n",
        "    name: str\n",
        "resource Debian(Host): ...\n",
        "resource Windows(Host): ...\n",
        "resource WebServer:\n",
        "    host: Host\n",
        "    implement a(self, h: Host):\n",
        "        self.host = h\n",
        "    implement b(self, h: Host):\n",
        "        self.host = h\n",
        "d = Debian(\"deb1\")\n",
        "w = WebServer(d)\n",
    );
    let (_, err) = compile_err(source);
    assert!(matches!(err, Error::Ambiguous { .. }), "got {err}");
}

#[test]
fn constraints_disambiguate_overloads() {
    let source = concat!(
        "resource Host:\n",
        "    name: str\n",
        "resource Debian(Host): ...\n",
        "resource Windows(Host): ...\n",
        "resource WebServer:\n",
        "    host: Host\n",
        "    flavor: str\n",
        "    @constraint(isinstance(h, Debian))\n",
        "    implement apt(self, h: Host):\n",
        "        self.host = h\n",
        "        self.flavor = \"apt\"\n",
        "    @constraint(isinstance(h, Windows))\n",
        "    implement msi(self, h: Host):\n",
        "        self.host = h\n",
        "        self.flavor = \"msi\"\n",
        "d = Debian(\"deb1\")\n",
        "w = WebServer(d)\n",
    );
    let compilation = compile_ok(source);
    let Value::Resource(web) = var(&compilation, "w") else {
        panic!()
    };
    assert_eq!(web.get("flavor"), Some(Value::str("apt")));
}

#[test]
fn inheritance_copies_and_tightens_schema() {
    let source = concat!(
        "typedef ShortName str if \"-\" in self\n",
        "resource Base:\n",
        "    name: str\n",
        "    size: int = 1\n",
        "resource Derived(Base):\n",
        "    name: ShortName\n",
        "    extra: bool = False\n",
        "d = Derived(\"a-b\")\n",
    );
    let compilation = compile_ok(source);
    let Value::Resource(derived) = var(&compilation, "d") else {
        panic!()
    };
    assert_eq!(derived.get("size"), Some(Value::Int(1)));
    assert_eq!(derived.get("extra"), Some(Value::Bool(false)));

    // Widening an inherited property is rejected.
    let widened = concat!(
        "resource Base:\n",
        "    port: int\n",
        "resource Derived(Base):\n",
        "    port: str\n",
    );
    let (_, err) = compile_err(widened);
    assert!(matches!(err, Error::TypeMismatch { .. }), "got {err}");
}

#[test]
fn derived_resources_do_not_inherit_constructors() {
    let source = concat!(
        "resource Base:\n",
        "    name: str\n",
        "    def __init__(self, name: str):\n",
        "        self.name = name + \"!\"\n",
        "resource Derived(Base): ...\n",
        "d = Derived(\"plain\")\n",
    );
    let compilation = compile_ok(source);
    let Value::Resource(derived) = var(&compilation, "d") else {
        panic!()
    };
    // The default constructor applies: no "!" appended.
    assert_eq!(derived.get("name"), Some(Value::str("plain")));
}

#[test]
fn resource_identity_vs_structural_equality() {
    let source = concat!(
        "resource Host:\n",
        "    name: str\n",
        "a = Host(\"one\")\n",
        "same = a == a\n",
        "n = None == None\n",
        "m = None == False\n",
    );
    let compilation = compile_ok(source);
    assert_eq!(var(&compilation, "same"), Value::Bool(true));
    assert_eq!(var(&compilation, "n"), Value::Bool(true));
    assert_eq!(var(&compilation, "m"), Value::Bool(false));
}

#[test]
fn lists_dicts_and_iteration() {
    let source = concat!(
        "ports = [8080, 8081, 8082]\n",
        "total: int\n",
        "found = 8081 in ports\n",
        "names = {\"a\": 1, \"b\": 2}\n",
        "has_a = \"a\" in names\n",
        "first = ports[0]\n",
        "b_val = names[\"b\"]\n",
    );
    let compilation = compile_ok(source);
    assert_eq!(var(&compilation, "found"), Value::Bool(true));
    assert_eq!(var(&compilation, "has_a"), Value::Bool(true));
    assert_eq!(var(&compilation, "first"), Value::Int(8080));
    assert_eq!(var(&compilation, "b_val"), Value::Int(2));
}

#[test]
fn for_loop_binds_fresh_scope_per_iteration() {
    let source = concat!(
        "resource Port:\n",
        "    number: int\n",
        "for p in [1, 2, 3]:\n",
        "    x = p * 10\n",
        "    r = Port(x)\n",
    );
    // `x` and `r` rebind per iteration without a reassignment error, and
    // three distinct resources come out.
    let compilation = compile_ok(source);
    assert_eq!(compilation.resources.len(), 3);
    let indexes: Vec<&str> = compilation
        .resources
        .iter()
        .filter_map(|r| r.index())
        .collect();
    assert_eq!(indexes, vec!["Port-10", "Port-20", "Port-30"]);
}

#[test]
fn dict_iteration_follows_insertion_order() {
    let source = concat!(
        "resource Entry:\n",
        "    key: str\n",
        "for k in {\"b\": 1, \"a\": 2}:\n",
        "    e = Entry(k)\n",
    );
    let compilation = compile_ok(source);
    let indexes: Vec<&str> = compilation
        .resources
        .iter()
        .filter_map(|r| r.index())
        .collect();
    assert_eq!(indexes, vec!["Entry-b", "Entry-a"]);
}

#[test]
fn list_append_is_frozen_by_resource_construction() {
    let ok = concat!(
        "xs = [1]\n",
        "y = xs.append(2)\n",
        "n = xs[1]\n",
    );
    let compilation = compile_ok(ok);
    assert_eq!(var(&compilation, "n"), Value::Int(2));

    let frozen = concat!(
        "resource Holder:\n",
        "    items: list[int]\n",
        "xs = [1]\n",
        "h = Holder(xs)\n",
        "xs.append(2)\n",
    );
    let result = compile(frozen);
    assert!(result.is_err(), "append after construction must fail");
}

#[test]
fn enums_and_member_access() {
    let source = concat!(
        "enum Color:\n",
        "    RED\n",
        "    GREEN\n",
        "c = Color.RED\n",
        "eq = c == Color.RED\n",
        "ne = c == Color.GREEN\n",
    );
    let compilation = compile_ok(source);
    assert_eq!(var(&compilation, "eq"), Value::Bool(true));
    assert_eq!(var(&compilation, "ne"), Value::Bool(false));

    let (_, err) = compile_err("enum Color:\n    RED\nc = Color.BLUE\n");
    assert!(matches!(err, Error::Name { .. }));
}

#[test]
fn enum_typed_property_indexes_by_member() {
    let source = concat!(
        "enum Flavor:\n",
        "    VANILLA\n",
        "    CHOCOLATE\n",
        "resource Cake:\n",
        "    flavor: Flavor\n",
        "cake = Cake(Flavor.CHOCOLATE)\n",
    );
    let compilation = compile_ok(source);
    let Value::Resource(cake) = var(&compilation, "cake") else {
        panic!()
    };
    assert_eq!(cake.index(), Some("Cake-CHOCOLATE"));
}

#[test]
fn optional_and_union_coercion() {
    let source = concat!(
        "resource Record:\n",
        "    name: str\n",
        "    note: Optional[str] = None\n",
        "    amount: Union[int, float] = 0\n",
        "r = Record(\"x\")\n",
        "s = Record(\"y\", \"hello\", 1.5)\n",
    );
    let compilation = compile_ok(source);
    let Value::Resource(r) = var(&compilation, "r") else {
        panic!()
    };
    assert_eq!(r.get("note"), Some(Value::None));
    let Value::Resource(s) = var(&compilation, "s") else {
        panic!()
    };
    assert_eq!(s.get("amount"), Some(Value::Float(1.5)));
}

#[test]
fn int_widens_to_float_property() {
    let source = concat!(
        "resource Gauge:\n",
        "    name: str\n",
        "    level: float\n",
        "g = Gauge(\"cpu\", 1)\n",
    );
    let compilation = compile_ok(source);
    let Value::Resource(g) = var(&compilation, "g") else {
        panic!()
    };
    assert_eq!(g.get("level"), Some(Value::Float(1.0)));
}

#[test]
fn protected_str_redacts_in_errors() {
    let source = concat!(
        "typedef ApiKey ProtectedStr if 1 == 2\n",
        "resource Svc:\n",
        "    name: str\n",
        "    key: ApiKey\n",
        "k = \"supersecret\"\n",
        "s = Svc(\"x\", k)\n",
    );
    let (_, err) = compile_err(source);
    let Error::Refinement { ref value, .. } = err else {
        panic!("expected a refinement error, got {err}");
    };
    // The failing value is rendered redacted in the message.
    assert_eq!(value, "***");
    assert!(!err.to_string().contains("supersecret"));
}

#[test]
fn protected_str_redacts_in_model_json() {
    let source = concat!(
        "resource Svc:\n",
        "    name: str\n",
        "    key: ProtectedStr\n",
        "s = Svc(\"x\", \"supersecret\")\n",
    );
    let compilation = compile_ok(source);
    let json = serde_json::to_string(&compilation.model_json()).unwrap();
    assert!(!json.contains("supersecret"));
    assert!(json.contains("***"));
}

#[test]
fn promises_compile_to_unresolved_slots() {
    let source = concat!(
        "resource Vm:\n",
        "    name: str\n",
        "    promise ip: str\n",
        "vm = Vm(\"vm-1\")\n",
        "carried = vm.ip\n",
    );
    let compilation = compile_ok(source);
    let Value::Resource(vm) = var(&compilation, "vm") else {
        panic!()
    };
    let promises = vm.promises();
    assert_eq!(promises.len(), 1);
    assert_eq!(promises[0].0, "ip");
    assert!(promises[0].1.get().is_none());
    assert!(matches!(var(&compilation, "carried"), Value::Promise(_)));
}

#[test]
fn builtin_plugins_are_always_available() {
    let compilation = compile_ok("t = type(1)\nh = human_readable(81920)\n");
    assert_eq!(var(&compilation, "t"), Value::str("int"));
    assert_eq!(var(&compilation, "h"), Value::str("10KB"));
}

#[test]
fn host_plugins_link_into_their_module() {
    let dir = tempfile::tempdir().unwrap();
    // The Eiko side of the module; its host sibling provides `double`.
    std::fs::write(dir.path().join("util.eiko"), "scale = 2\n").unwrap();
    std::fs::write(
        dir.path().join("main.eiko"),
        "import util\nx = util.double(21)\n",
    )
    .unwrap();

    let mut registry = ExtensionRegistry::new();
    registry.register_plugin(
        "util",
        PluginDef::new(
            "double",
            vec![PluginParam {
                name: "n".to_string(),
                ty: Type::Int,
            }],
            Type::Int,
            |args| match &args[0] {
                Value::Int(n) => Ok(Value::Int(n * 2)),
                _ => Err(PluginError::internal("expected an int")),
            },
        ),
    );

    let compilation = Compiler::new(registry)
        .compile_file(&dir.path().join("main.eiko"))
        .unwrap_or_else(|f| panic!("{}", f.render()));
    assert_eq!(var(&compilation, "x"), Value::Int(42));
}

#[test]
fn plugin_user_error_surfaces_with_message() {
    let compilation = Compiler::default().compile_source("x = machine_readable(\"zz\")\n", None);
    let failure = compilation.err().expect("plugin call should fail");
    assert!(matches!(
        failure.errors[0],
        Error::PluginUser { .. }
    ));
    assert!(failure.render().contains("zz"));
}

#[test]
fn parse_errors_do_not_hide_later_ones() {
    let failure = compile("a = = 1\nb = ] 2\n").err().expect("should fail");
    assert!(failure.errors.len() >= 2);
    assert!(failure
        .errors
        .iter()
        .all(|e| matches!(e, Error::Syntax { .. })));
}

#[test]
fn conditionals_and_membership_drive_control_flow() {
    let source = concat!(
        "env = \"prod\"\n",
        "if env == \"prod\":\n",
        "    replicas = 3\n",
        "elif env == \"dev\":\n",
        "    replicas = 1\n",
        "else:\n",
        "    replicas = 0\n",
    );
    let compilation = compile_ok(source);
    assert_eq!(var(&compilation, "replicas"), Value::Int(3));
}

#[test]
fn nested_resource_values_are_shared_by_handle() {
    let source = concat!(
        "resource Host:\n",
        "    name: str\n",
        "resource Cmd:\n",
        "    cmd: str\n",
        "    host: Host\n",
        "h = Host(\"db\")\n",
        "c1 = Cmd(\"ls\", h)\n",
        "c2 = Cmd(\"pwd\", h)\n",
    );
    let compilation = compile_ok(source);
    let Value::Resource(c1) = var(&compilation, "c1") else {
        panic!()
    };
    let Value::Resource(c2) = var(&compilation, "c2") else {
        panic!()
    };
    let (Some(Value::Resource(h1)), Some(Value::Resource(h2))) =
        (c1.get("host"), c2.get("host"))
    else {
        panic!("hosts missing");
    };
    assert!(Arc::ptr_eq(&h1, &h2), "shared child must not be duplicated");
    // One Host, two Cmds.
    assert_eq!(compilation.resources.len(), 3);
}

#[test]
fn dict_key_types_are_restricted() {
    let (_, err) = compile_err("x: dict[float, int]\n");
    assert!(matches!(err, Error::TypeMismatch { .. }), "got {err}");
}

#[test]
fn imports_load_modules_and_cache_them() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(
        dir.path().join("shared.eiko"),
        concat!(
            "resource Token:\n",
            "    name: str\n",
            "t = Token(\"once\")\n",
        ),
    )
    .unwrap();
    std::fs::write(
        dir.path().join("left.eiko"),
        "import shared\nl = shared.t\n",
    )
    .unwrap();
    std::fs::write(
        dir.path().join("right.eiko"),
        "import shared\nr = shared.t\n",
    )
    .unwrap();
    let mut main = std::fs::File::create(dir.path().join("main.eiko")).unwrap();
    writeln!(main, "import left").unwrap();
    writeln!(main, "import right").unwrap();
    drop(main);

    // `shared` is imported through two paths; evaluating it twice would
    // construct Token-once twice and die with a duplicate index.
    let compilation = Compiler::default()
        .compile_file(&dir.path().join("main.eiko"))
        .unwrap_or_else(|f| panic!("{}", f.render()));
    assert_eq!(compilation.resources.len(), 1);
}

#[test]
fn from_import_binds_names() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("lib.eiko"), "answer = 42\n").unwrap();
    std::fs::write(
        dir.path().join("main.eiko"),
        "from lib import answer as a\nb = a + 1\n",
    )
    .unwrap();

    let compilation = Compiler::default()
        .compile_file(&dir.path().join("main.eiko"))
        .unwrap_or_else(|f| panic!("{}", f.render()));
    assert_eq!(var(&compilation, "b"), Value::Int(43));
}

#[test]
fn packages_resolve_through_init_marker() {
    let dir = tempfile::tempdir().unwrap();
    let pkg = dir.path().join("mypkg");
    std::fs::create_dir(&pkg).unwrap();
    std::fs::write(pkg.join("__init__.eiko"), "base = 10\n").unwrap();
    std::fs::write(pkg.join("extra.eiko"), "more = 32\n").unwrap();
    std::fs::write(
        dir.path().join("main.eiko"),
        "import mypkg.extra\nx = mypkg.base + mypkg.extra.more\n",
    )
    .unwrap();

    let compilation = Compiler::default()
        .compile_file(&dir.path().join("main.eiko"))
        .unwrap_or_else(|f| panic!("{}", f.render()));
    assert_eq!(var(&compilation, "x"), Value::Int(42));
}

#[test]
fn cyclic_imports_are_detected() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("a.eiko"), "import b\n").unwrap();
    std::fs::write(dir.path().join("b.eiko"), "import a\n").unwrap();
    std::fs::write(dir.path().join("main.eiko"), "import a\n").unwrap();

    let failure = Compiler::default()
        .compile_file(&dir.path().join("main.eiko"))
        .err()
        .expect("cycle should fail");
    assert!(
        failure
            .errors
            .iter()
            .any(|e| matches!(e, Error::ImportCyclic { .. })),
        "got: {}",
        failure.render()
    );
}

#[test]
fn missing_import_is_reported() {
    let (_, err) = compile_err("import nothing_here\n");
    assert!(matches!(err, Error::ImportNotFound { .. }));
}

#[test]
fn dict_values_keep_enum_keys() {
    let source = concat!(
        "enum Env:\n",
        "    DEV\n",
        "    PROD\n",
        "sizes = {Env.DEV: 1, Env.PROD: 3}\n",
        "p = sizes[Env.PROD]\n",
    );
    let compilation = compile_ok(source);
    assert_eq!(var(&compilation, "p"), Value::Int(3));
    let Value::Dict(dict) = var(&compilation, "sizes") else {
        panic!()
    };
    assert!(matches!(
        dict.entries()[0].0,
        DictKey::Enum(ref name, ref member) if name == "Env" && member == "DEV"
    ));
}

#[test]
fn path_values_join_with_slash() {
    let source = concat!(
        "base = Path(\"/etc\")\n",
        "conf = base / \"ssh\" / \"sshd_config\"\n",
    );
    let compilation = compile_ok(source);
    let Value::Path(path) = var(&compilation, "conf") else {
        panic!()
    };
    assert_eq!(path.display().to_string(), "/etc/ssh/sshd_config");
}
