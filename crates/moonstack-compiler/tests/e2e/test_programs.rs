use super::helpers::*;
use moonstack_compiler::disasm::listing;
use moonstack_compiler::opcode::OpCode;

#[test]
fn e2e_fibonacci() {
    let src = r#"
local function fib(n)
    if n < 2 then
        return n
    end
    return fib(n - 1) + fib(n - 2)
end
return fib(10)
"#;
    let (proto, _) = compile_str(src);
    assert!(has_opcode(&proto, OpCode::Closure));
    assert!(has_opcode(&proto, OpCode::TailCall));
    assert_eq!(proto.protos.len(), 1);
    assert_eq!(count_opcode(&proto.protos[0], OpCode::Call), 2);
}

#[test]
fn e2e_counter_closure() {
    let src = r#"
local function make_counter()
    local count = 0
    return function()
        count = count + 1
        return count
    end
end
local c = make_counter()
return c()
"#;
    let (proto, _) = compile_str(src);
    let inner = &proto.protos[0].protos[0];
    assert!(has_opcode(inner, OpCode::GetUpval));
    assert!(has_opcode(inner, OpCode::SetUpval));
}

#[test]
fn e2e_sieve() {
    let src = r#"
local function sieve(n)
    local is_prime = {}
    for i = 2, n do
        is_prime[i] = true
    end
    for i = 2, n do
        if is_prime[i] then
            for j = i * i, n, i do
                is_prime[j] = false
            end
        end
    end
    local count = 0
    for i = 2, n do
        if is_prime[i] then
            count = count + 1
        end
    end
    return count
end
return sieve(100)
"#;
    let (proto, _) = compile_str(src);
    let f = &proto.protos[0];
    assert_eq!(count_opcode(f, OpCode::ForPrep), 4);
    assert_eq!(count_opcode(f, OpCode::ForLoop), 4);
}

#[test]
fn e2e_class_pattern() {
    let src = r#"
local Account = {}
Account.__index = Account

function Account.new(balance)
    return setmetatable({balance = balance}, Account)
end

function Account:deposit(v)
    self.balance = self.balance + v
end

local a = Account.new(100)
a:deposit(50)
return a.balance
"#;
    let (proto, _) = compile_str(src);
    assert_eq!(proto.protos.len(), 2);
    assert_eq!(proto.protos[1].num_params, 2);
    assert!(has_opcode(&proto, OpCode::Self_));
}

#[test]
fn e2e_listing_mentions_every_function() {
    let src = "local function a() end\nlocal function b() return function() end end";
    let mut strings = moonstack_core::string::StringInterner::new();
    let proto = moonstack_compiler::compile(src.as_bytes(), "@prog.lua", &mut strings).unwrap();
    let out = listing(&proto, &strings);
    assert_eq!(out.matches("function <prog.lua:").count(), 3);
    assert!(out.contains("main <prog.lua:0,0>"));
}
