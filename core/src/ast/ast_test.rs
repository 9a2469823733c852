use crate::ast::{self, ExprKind, StmtKind, TableField};

fn parse(src: &str) -> ast::Chunk {
    ast::parse(src).expect("parse failure")
}

#[test]
fn parses_local_with_multiple_names() {
    let chunk = parse("local a, b = 1, 'x'");
    assert_eq!(chunk.block.stmts.len(), 1);
    match &chunk.block.stmts[0].kind {
        StmtKind::Local { names, exprs } => {
            assert_eq!(names.len(), 2);
            assert_eq!(names[0].text, "a");
            assert_eq!(names[1].text, "b");
            assert_eq!(exprs.len(), 2);
        }
        other => panic!("expected local, got {:?}", other),
    }
}

#[test]
fn parses_compound_assignment() {
    let chunk = parse("x += 2");
    match &chunk.block.stmts[0].kind {
        StmtKind::CompoundAssign { op, targets, values } => {
            assert_eq!(*op, ast::BinOp::Add);
            assert_eq!(targets.len(), 1);
            assert_eq!(values.len(), 1);
        }
        other => panic!("expected compound assign, got {:?}", other),
    }
}

#[test]
fn parses_function_name_with_fields_and_method() {
    let chunk = parse("function a.b.c:m(x, ...) end");
    match &chunk.block.stmts[0].kind {
        StmtKind::FunctionDecl { name, body } => {
            assert_eq!(name.base.text, "a");
            assert_eq!(name.fields.len(), 2);
            assert_eq!(name.method.as_ref().unwrap().text, "m");
            assert_eq!(body.params.len(), 1);
            assert!(body.is_vararg);
        }
        other => panic!("expected function decl, got {:?}", other),
    }
}

#[test]
fn parses_table_constructor_fields() {
    let chunk = parse("t = { a = 1, 2, [true] = 'x'; 3 }");
    match &chunk.block.stmts[0].kind {
        StmtKind::Assign { values, .. } => match &values[0].kind {
            ExprKind::Table { fields } => {
                assert_eq!(fields.len(), 4);
                assert!(matches!(fields[0], TableField::Named { .. }));
                assert!(matches!(fields[1], TableField::Positional(_)));
                assert!(matches!(fields[2], TableField::Keyed { .. }));
                assert!(matches!(fields[3], TableField::Positional(_)));
            }
            other => panic!("expected table, got {:?}", other),
        },
        other => panic!("expected assign, got {:?}", other),
    }
}

#[test]
fn string_and_table_calls_desugar_to_calls() {
    let chunk = parse("f 'lit' g{1}");
    assert_eq!(chunk.block.stmts.len(), 2);
    for stmt in &chunk.block.stmts {
        match &stmt.kind {
            StmtKind::Call(expr) => {
                assert!(matches!(expr.kind, ExprKind::Call { .. }));
            }
            other => panic!("expected call stmt, got {:?}", other),
        }
    }
}

#[test]
fn method_call_statement() {
    let chunk = parse("obj:update(1)");
    match &chunk.block.stmts[0].kind {
        StmtKind::Call(expr) => {
            assert!(matches!(expr.kind, ExprKind::MethodCall { .. }));
        }
        other => panic!("expected call stmt, got {:?}", other),
    }
}

#[test]
fn operator_precedence_and_associativity() {
    let chunk = parse("x = 1 + 2 * 3");
    match &chunk.block.stmts[0].kind {
        StmtKind::Assign { values, .. } => match &values[0].kind {
            ExprKind::Binary { op, rhs, .. } => {
                assert_eq!(*op, ast::BinOp::Add);
                assert!(matches!(
                    rhs.kind,
                    ExprKind::Binary { op: ast::BinOp::Mul, .. }
                ));
            }
            other => panic!("expected binary, got {:?}", other),
        },
        other => panic!("expected assign, got {:?}", other),
    }

    // -a^b parses as -(a^b)
    let chunk = parse("x = -a^b");
    match &chunk.block.stmts[0].kind {
        StmtKind::Assign { values, .. } => match &values[0].kind {
            ExprKind::Unary { expr, .. } => {
                assert!(matches!(
                    expr.kind,
                    ExprKind::Binary { op: ast::BinOp::Pow, .. }
                ));
            }
            other => panic!("expected unary, got {:?}", other),
        },
        other => panic!("expected assign, got {:?}", other),
    }
}

#[test]
fn parses_control_flow_statements() {
    let src = r#"
        if a then x = 1 elseif b then x = 2 else x = 3 end
        while true do break end
        repeat x = x - 1 until x == 0
        for i = 1, 10, 2 do end
        for k, v in pairs(t) do end
        do end
        ::top::
        goto top
    "#;
    let chunk = parse(src);
    assert_eq!(chunk.block.stmts.len(), 8);
}

#[test]
fn return_must_end_block() {
    assert!(ast::parse("return 1\nx = 2").is_err());
    let chunk = parse("return 1, 2");
    match &chunk.block.stmts[0].kind {
        StmtKind::Return { exprs } => assert_eq!(exprs.len(), 2),
        other => panic!("expected return, got {:?}", other),
    }
}

#[test]
fn syntax_error_carries_line_and_column() {
    let err = ast::parse("x =\n= 2").unwrap_err();
    assert_eq!(err.line, 2);
    assert!(err.column >= 1);
}

#[test]
fn spans_cover_statements() {
    let chunk = parse("local value = 10");
    let span = chunk.block.stmts[0].span;
    assert_eq!(span.start.line, 1);
    assert_eq!(span.start.column, 1);
    assert_eq!(span.end.column, 17);
}
