use moonstack_vm::{LuaResult, State, StateConfig, Status};

/// A state without the base library.
pub fn bare() -> State {
    State::with_config(StateConfig::bare())
}

/// Render every value on the stack through `tostring` and clear it.
pub fn drain(s: &mut State) -> Vec<String> {
    let n = s.gettop();
    let out = (1..=n)
        .map(|i| {
            s.tostring_meta(i).unwrap();
            let text = s.tostring_lossy(-1).unwrap();
            s.pop(1);
            text
        })
        .collect();
    s.settop(0);
    out
}

/// Run a chunk in a fresh state with the base library; return its results
/// rendered as strings.
pub fn run_lua(source: &str) -> Vec<String> {
    let mut s = State::new();
    run_in(&mut s, source)
}

/// Run a chunk in `s`, which must succeed.
pub fn run_in(s: &mut State, source: &str) -> Vec<String> {
    let status = s.dostring(source).unwrap();
    let out = drain(s);
    assert_eq!(status, Status::Ok, "chunk failed: {out:?}\nsource:\n{source}");
    out
}

/// Run a chunk that must fail at run time; return the error message.
pub fn run_lua_err(source: &str) -> String {
    let mut s = State::new();
    let status = s.dostring(source).unwrap();
    assert_eq!(status, Status::ErrRun, "expected a runtime error\nsource:\n{source}");
    s.tostring_lossy(-1).unwrap()
}

/// Native helper: push the sum of its numeric arguments.
pub fn native_sum(s: &mut State) -> LuaResult<usize> {
    let mut total = 0.0;
    for i in 1..=s.gettop() {
        total += s.checknumber(i)?;
    }
    s.pushnumber(total);
    Ok(1)
}
