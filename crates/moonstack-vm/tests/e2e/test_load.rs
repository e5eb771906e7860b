use super::helpers::*;
use moonstack_vm::debug::chunkid;
use moonstack_vm::{State, Status, MULTRET};
use std::io::Write;

// ── chunk names ────────────────────────────────────────────────────────────

#[test]
fn e2e_chunk_names_in_messages() {
    let mut s = State::new();
    assert_eq!(s.load(b"error('x')", "=config", None).unwrap(), Status::Ok);
    assert_eq!(s.pcall(0, 0, 0).unwrap(), Status::ErrRun);
    assert_eq!(s.tostring_lossy(-1).as_deref(), Some("config:1: x"));
    s.settop(0);

    assert_eq!(s.load(b"\n\nerror('y')", "@scripts/boot.lua", None).unwrap(), Status::Ok);
    assert_eq!(s.pcall(0, 0, 0).unwrap(), Status::ErrRun);
    assert_eq!(s.tostring_lossy(-1).as_deref(), Some("scripts/boot.lua:3: y"));
    s.settop(0);

    assert_eq!(s.dostring("error('z')").unwrap(), Status::ErrRun);
    assert_eq!(s.tostring_lossy(-1).as_deref(), Some("[string \"error('z')\"]:1: z"));
}

#[test]
fn e2e_chunkid_shortens_long_names() {
    let path = format!("@/very/long/{}/script.lua", "nested/".repeat(12));
    let id = chunkid(path.as_bytes());
    assert!(id.starts_with("..."), "{id}");
    assert!(id.ends_with("/script.lua"), "{id}");

    let src = "local first_line = 1\nlocal second = 2";
    assert_eq!(chunkid(src.as_bytes()), "[string \"local first_line = 1...\"]");
}

// ── syntax errors ──────────────────────────────────────────────────────────

#[test]
fn e2e_syntax_errors_leave_one_message() {
    let mut s = State::new();
    s.pushstring("below");
    let status = s.load(b"local x = \nif", "=broken", None).unwrap();
    assert_eq!(status, Status::ErrSyntax);
    assert_eq!(s.gettop(), 2);
    let msg = s.tostring_lossy(-1).unwrap();
    assert!(msg.starts_with("broken:2:"), "{msg}");
    assert_eq!(s.tostring_lossy(1).as_deref(), Some("below"));
}

#[test]
fn e2e_loadstring_from_lua_reports_errors_as_values() {
    let out = run_lua(
        "local f, err = loadstring('return +', '=snippet')
         local g = loadstring('return 1 + 2')
         return f, err ~= nil, g()",
    );
    assert_eq!(out, ["nil", "true", "3"]);
}

#[test]
fn e2e_loaded_chunks_receive_varargs() {
    let mut s = State::new();
    assert_eq!(s.loadstring("local a, b = ... return b, a").unwrap(), Status::Ok);
    s.pushstring("first");
    s.pushstring("second");
    s.call(2, MULTRET).unwrap();
    assert_eq!(drain(&mut s), ["second", "first"]);
}

#[test]
fn e2e_chunks_see_the_globals_of_the_state() {
    let mut s = State::new();
    s.pushnumber(7.0);
    s.setglobal("seven").unwrap();
    assert_eq!(run_in(&mut s, "return seven * 6"), ["42"]);
}

// ── files ──────────────────────────────────────────────────────────────────

fn temp_script(tag: &str, body: &str) -> std::path::PathBuf {
    let path = std::env::temp_dir().join(format!("moonstack_e2e_{tag}_{}.lua", std::process::id()));
    let mut file = std::fs::File::create(&path).unwrap();
    file.write_all(body.as_bytes()).unwrap();
    path
}

#[test]
fn e2e_dofile_runs_a_script_with_results() {
    let path = temp_script("results", "local t = {}\nfor i = 1, 3 do t[i] = i * i end\nreturn t[1], t[2], t[3]\n");
    let mut s = State::new();
    assert_eq!(s.dofile(&path).unwrap(), Status::Ok);
    assert_eq!(drain(&mut s), ["1", "4", "9"]);
    std::fs::remove_file(&path).unwrap();
}

#[test]
fn e2e_loadfile_errors_name_the_file() {
    let path = temp_script("syntax", "#!/bin/moonstack\nlocal = 1\n");
    let mut s = State::new();
    assert_eq!(s.loadfile(&path).unwrap(), Status::ErrSyntax);
    let msg = s.tostring_lossy(-1).unwrap();
    let name = chunkid(format!("@{}", path.display()).as_bytes());
    assert!(msg.starts_with(&format!("{name}:2:")), "{msg}");
    std::fs::remove_file(&path).unwrap();
}
