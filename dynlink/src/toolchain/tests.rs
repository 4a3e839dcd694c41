use super::*;

fn scratch_dir(name: &str) -> PathBuf {
    let dir = std::env::temp_dir()
        .join("dynlink-tests")
        .join(format!("{name}-{}", std::process::id()));
    _ = std::fs::remove_dir_all(&dir);
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

#[test]
fn locate_reads_tools_version() {
    let root = scratch_dir("locate");
    let config = ToolchainConfig {
        root: Some(root.clone()),
    };

    match Toolchain::locate(&config) {
        Err(PatchError::ToolchainNotFound(path)) => assert!(path.ends_with(TOOLS_VERSION_FILE)),
        other => panic!("unexpected: {other:?}"),
    }

    let version_file = root.join(TOOLS_VERSION_FILE);
    std::fs::create_dir_all(version_file.parent().unwrap()).unwrap();
    std::fs::write(&version_file, "14.40.33807\r\n").unwrap();

    let toolchain = Toolchain::locate(&config).unwrap();
    assert_eq!(toolchain.version(), "14.40.33807");

    assert!(matches!(
        toolchain.tools_dir(Architecture::X86),
        Err(PatchError::ToolchainNotFound(_))
    ));

    let bin = root
        .join("VC/Tools/MSVC/14.40.33807/bin")
        .join(format!("Host{}", Architecture::host().friendly_name()))
        .join("x86");
    std::fs::create_dir_all(&bin).unwrap();
    assert_eq!(toolchain.tools_dir(Architecture::X86).unwrap(), bin);
    assert!(toolchain.tools_dir(Architecture::X64).is_err());

    // The tools directory exists but the tools do not, so running them fails.
    assert!(toolchain.lib(&bin.join("a.def"), Architecture::X86, &bin.join("a.lib")).is_err());
    assert_eq!(toolchain.demangle("?Bar@@YAXXZ", Architecture::X86), None);
}

#[test]
fn empty_version_file() {
    let root = scratch_dir("empty-version");
    let version_file = root.join(TOOLS_VERSION_FILE);
    std::fs::create_dir_all(version_file.parent().unwrap()).unwrap();
    std::fs::write(&version_file, "  \n").unwrap();

    assert!(Toolchain::locate(&ToolchainConfig { root: Some(root) }).is_err());
}

#[test]
fn undname_output() {
    let output = "Microsoft (R) C++ Name Undecorator\n\
                  Undecoration of :- \"?Bar@@YAXXZ\"\n\
                  is :- \"void __cdecl Bar(void)\"\n";
    assert_eq!(
        parse_undname_output(output).as_deref(),
        Some("void __cdecl Bar(void)")
    );
    assert_eq!(parse_undname_output("garbage"), None);
}

#[test]
fn builtin_demangler() {
    let d = BuiltinDemangler;
    let demangled = d.demangle("?Bar@@YAXXZ", Architecture::X64).unwrap();
    assert!(demangled.contains("Bar"), "{demangled}");
    assert_eq!(d.demangle("Bar", Architecture::X64), None);
}
