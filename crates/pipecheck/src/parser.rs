use crate::ast::{
    FieldDecl, ImportDecl, Item, Marker, PipelineDecl, PipelineExpr, Program, SchemaBody,
    SchemaDecl, SchemaSlot, StageDecl, StageForm, StageRef, TypeDecl, TypeExpr,
};
use crate::error::{Diagnostic, Span};
use crate::token::{Token, TokenKind};

pub fn parse(tokens: &[Token]) -> Result<Program, Diagnostic> {
    Parser::new(tokens).parse_program()
}

struct Parser<'a> {
    tokens: &'a [Token],
    index: usize,
}

impl<'a> Parser<'a> {
    fn new(tokens: &'a [Token]) -> Self {
        Self { tokens, index: 0 }
    }

    fn parse_program(mut self) -> Result<Program, Diagnostic> {
        let mut items = Vec::new();
        while !self.at_eof() {
            let item = match self.current().kind {
                TokenKind::KwImport => Item::Import(self.parse_import_decl()?),
                TokenKind::KwType => Item::Type(self.parse_type_decl()?),
                TokenKind::KwSchema => Item::Schema(self.parse_schema_decl()?),
                TokenKind::KwStage => Item::Stage(self.parse_stage_decl()?),
                TokenKind::KwSource => Item::Stage(self.parse_source_decl()?),
                TokenKind::KwPipeline => Item::Pipeline(self.parse_pipeline_decl()?),
                _ => {
                    return Err(Diagnostic::syntax(
                        format!(
                            "expected top-level declaration, found {}",
                            self.current().kind.describe()
                        ),
                        self.current().span,
                    ))
                }
            };
            items.push(item);
        }

        Ok(Program { items })
    }

    fn parse_import_decl(&mut self) -> Result<ImportDecl, Diagnostic> {
        let start = self.expect(TokenKind::KwImport)?.start;
        let Some(path) = self.take_string() else {
            return Err(self.unexpected("import path string"));
        };
        let end = self.expect(TokenKind::Semicolon)?.end;
        Ok(ImportDecl {
            path,
            span: Span::new(start, end),
        })
    }

    fn parse_type_decl(&mut self) -> Result<TypeDecl, Diagnostic> {
        let start = self.expect(TokenKind::KwType)?.start;
        let (name, _) = self.expect_ident()?;
        let generics = self.parse_generic_params()?;

        let mut parents = Vec::new();
        if self.at(&TokenKind::Colon) {
            self.advance();
            loop {
                let (parent, _) = self.expect_ident()?;
                parents.push(parent);
                if self.at(&TokenKind::Comma) {
                    self.advance();
                    continue;
                }
                break;
            }
        }

        let end = self.expect(TokenKind::Semicolon)?.end;
        Ok(TypeDecl {
            name,
            generics,
            parents,
            span: Span::new(start, end),
        })
    }

    fn parse_schema_decl(&mut self) -> Result<SchemaDecl, Diagnostic> {
        let start = self.expect(TokenKind::KwSchema)?.start;
        let (name, _) = self.expect_ident()?;
        let generics = self.parse_generic_params()?;

        let body = if self.at(&TokenKind::Eq) {
            self.advance();
            SchemaBody::Alias(self.parse_type_expr()?)
        } else if self.at(&TokenKind::LBrace) {
            SchemaBody::Record(self.parse_field_block()?)
        } else {
            return Err(self.unexpected("'{' or '=' in schema declaration"));
        };

        let end = self.expect(TokenKind::Semicolon)?.end;
        Ok(SchemaDecl {
            name,
            generics,
            body,
            span: Span::new(start, end),
        })
    }

    fn parse_stage_decl(&mut self) -> Result<StageDecl, Diagnostic> {
        let start = self.expect(TokenKind::KwStage)?.start;
        let (name, _) = self.expect_ident()?;
        let generics = self.parse_generic_params()?;

        let (input, output) = if self.at(&TokenKind::Colon) {
            self.advance();
            let input = self.parse_schema_slot()?;
            self.expect(TokenKind::Arrow)?;
            let output = self.parse_schema_slot()?;
            (input, output)
        } else {
            (SchemaSlot::Undeclared, SchemaSlot::Undeclared)
        };

        let marker = self.parse_marker()?;
        let end = self.expect(TokenKind::Semicolon)?.end;
        Ok(StageDecl {
            name,
            form: StageForm::Stage,
            generics,
            input,
            output,
            marker,
            span: Span::new(start, end),
        })
    }

    fn parse_source_decl(&mut self) -> Result<StageDecl, Diagnostic> {
        let start = self.expect(TokenKind::KwSource)?.start;
        let (name, _) = self.expect_ident()?;
        let generics = self.parse_generic_params()?;

        let output = if self.at(&TokenKind::Arrow) {
            self.advance();
            self.parse_schema_slot()?
        } else {
            SchemaSlot::Undeclared
        };

        let marker = self.parse_marker()?;
        let end = self.expect(TokenKind::Semicolon)?.end;
        Ok(StageDecl {
            name,
            form: StageForm::Source,
            generics,
            input: SchemaSlot::Undeclared,
            output,
            marker,
            span: Span::new(start, end),
        })
    }

    fn parse_pipeline_decl(&mut self) -> Result<PipelineDecl, Diagnostic> {
        let start = self.expect(TokenKind::KwPipeline)?.start;
        let (name, _) = self.expect_ident()?;
        self.expect(TokenKind::Eq)?;
        let expr = self.parse_pipeline_expr()?;
        let end = self.expect(TokenKind::Semicolon)?.end;
        Ok(PipelineDecl {
            name,
            expr,
            span: Span::new(start, end),
        })
    }

    fn parse_pipeline_expr(&mut self) -> Result<PipelineExpr, Diagnostic> {
        let mut expr = self.parse_pipeline_term()?;
        while self.at(&TokenKind::Star) {
            let op_span = self.current().span;
            self.advance();
            let right = self.parse_pipeline_term()?;
            expr = PipelineExpr::Compose {
                left: Box::new(expr),
                right: Box::new(right),
                op_span,
            };
        }
        Ok(expr)
    }

    fn parse_pipeline_term(&mut self) -> Result<PipelineExpr, Diagnostic> {
        if self.at(&TokenKind::LParen) {
            self.advance();
            let inner = self.parse_pipeline_expr()?;
            self.expect(TokenKind::RParen)?;
            return Ok(inner);
        }

        let (name, name_span) = self.expect_ident()?;
        let mut end = name_span.end;
        let mut args = Vec::new();
        if self.at(&TokenKind::LAngle) {
            args = self.parse_type_args()?;
            end = self.previous_span().end;
        }
        Ok(PipelineExpr::Stage(StageRef {
            name,
            args,
            span: Span::new(name_span.start, end),
        }))
    }

    fn parse_schema_slot(&mut self) -> Result<SchemaSlot, Diagnostic> {
        match self.current().kind {
            TokenKind::Underscore => {
                self.advance();
                Ok(SchemaSlot::Undeclared)
            }
            TokenKind::LBrace => Ok(SchemaSlot::Inline(self.parse_field_block()?)),
            _ => Ok(SchemaSlot::Named(self.parse_type_expr()?)),
        }
    }

    fn parse_marker(&mut self) -> Result<Option<Marker>, Diagnostic> {
        if !self.at(&TokenKind::At) {
            return Ok(None);
        }
        let start = self.current().span.start;
        self.advance();
        // `source` lexes as a keyword but is a valid marker name.
        let (name, end) = if self.at(&TokenKind::KwSource) {
            let end = self.current().span.end;
            self.advance();
            ("source".to_string(), end)
        } else {
            let (name, span) = self.expect_ident()?;
            (name, span.end)
        };
        Ok(Some(Marker {
            name,
            span: Span::new(start, end),
        }))
    }

    fn parse_field_block(&mut self) -> Result<Vec<FieldDecl>, Diagnostic> {
        self.expect(TokenKind::LBrace)?;
        let mut fields = Vec::new();
        while !self.at(&TokenKind::RBrace) {
            let (name, name_span) = self.expect_ident()?;
            self.expect(TokenKind::Colon)?;
            let ty = self.parse_type_expr()?;
            let span = Span::new(name_span.start, ty.span.end);
            fields.push(FieldDecl { name, ty, span });

            if self.at(&TokenKind::Comma) {
                self.advance();
                continue;
            }
            break;
        }
        self.expect(TokenKind::RBrace)?;
        Ok(fields)
    }

    fn parse_generic_params(&mut self) -> Result<Vec<String>, Diagnostic> {
        let mut generics = Vec::new();
        if !self.at(&TokenKind::LAngle) {
            return Ok(generics);
        }
        self.advance();
        if !self.at(&TokenKind::RAngle) {
            loop {
                let (generic_name, _) = self.expect_ident()?;
                generics.push(generic_name);
                if self.at(&TokenKind::Comma) {
                    self.advance();
                    continue;
                }
                break;
            }
        }
        self.expect(TokenKind::RAngle)?;
        Ok(generics)
    }

    fn parse_type_expr(&mut self) -> Result<TypeExpr, Diagnostic> {
        let (name, name_span) = self.expect_ident()?;
        let mut end = name_span.end;
        let mut args = Vec::new();
        if self.at(&TokenKind::LAngle) {
            args = self.parse_type_args()?;
            end = self.previous_span().end;
        }
        Ok(TypeExpr {
            name,
            args,
            span: Span::new(name_span.start, end),
        })
    }

    fn parse_type_args(&mut self) -> Result<Vec<TypeExpr>, Diagnostic> {
        self.expect(TokenKind::LAngle)?;
        let mut args = Vec::new();
        loop {
            args.push(self.parse_type_expr()?);
            if self.at(&TokenKind::Comma) {
                self.advance();
                continue;
            }
            break;
        }
        self.expect(TokenKind::RAngle)?;
        Ok(args)
    }

    fn expect(&mut self, kind: TokenKind) -> Result<Span, Diagnostic> {
        if self.current().kind == kind {
            let span = self.current().span;
            self.advance();
            Ok(span)
        } else {
            Err(self.unexpected(kind.describe()))
        }
    }

    fn expect_ident(&mut self) -> Result<(String, Span), Diagnostic> {
        let span = self.current().span;
        if let Some(name) = self.take_ident() {
            Ok((name, span))
        } else {
            Err(self.unexpected("identifier"))
        }
    }

    fn take_ident(&mut self) -> Option<String> {
        if let TokenKind::Ident(name) = &self.current().kind {
            let name = name.clone();
            self.advance();
            Some(name)
        } else {
            None
        }
    }

    fn take_string(&mut self) -> Option<String> {
        if let TokenKind::StringLiteral(value) = &self.current().kind {
            let value = value.clone();
            self.advance();
            Some(value)
        } else {
            None
        }
    }

    fn unexpected(&self, expected: &str) -> Diagnostic {
        Diagnostic::syntax(
            format!(
                "expected {expected}, found {}",
                self.current().kind.describe()
            ),
            self.current().span,
        )
    }

    fn current(&self) -> &Token {
        &self.tokens[self.index.min(self.tokens.len() - 1)]
    }

    fn previous_span(&self) -> Span {
        self.tokens[self.index.saturating_sub(1)].span
    }

    fn at(&self, kind: &TokenKind) -> bool {
        &self.current().kind == kind
    }

    fn at_eof(&self) -> bool {
        matches!(self.current().kind, TokenKind::Eof)
    }

    fn advance(&mut self) {
        if self.index < self.tokens.len() - 1 {
            self.index += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::lex;

    fn parse_ok(source: &str) -> Program {
        let tokens = lex(source).expect("source should lex");
        parse(&tokens).expect("source should parse")
    }

    fn parse_err(source: &str) -> Diagnostic {
        let tokens = lex(source).expect("source should lex");
        parse(&tokens).expect_err("source should not parse")
    }

    #[test]
    fn composition_is_left_associative() {
        let program = parse_ok("pipeline p = A * B * C;");
        let Item::Pipeline(pipeline) = &program.items[0] else {
            panic!("expected pipeline");
        };
        let PipelineExpr::Compose { left, right, .. } = &pipeline.expr else {
            panic!("expected composition");
        };
        assert!(matches!(**left, PipelineExpr::Compose { .. }));
        assert!(matches!(&**right, PipelineExpr::Stage(stage) if stage.name == "C"));

        let names = pipeline
            .expr
            .stages()
            .iter()
            .map(|stage| stage.name.as_str())
            .collect::<Vec<_>>();
        assert_eq!(names, vec!["A", "B", "C"]);
    }

    #[test]
    fn parentheses_group_subchains() {
        let program = parse_ok("pipeline p = A * (B * C);");
        let Item::Pipeline(pipeline) = &program.items[0] else {
            panic!("expected pipeline");
        };
        let PipelineExpr::Compose { left, right, .. } = &pipeline.expr else {
            panic!("expected composition");
        };
        assert!(matches!(&**left, PipelineExpr::Stage(stage) if stage.name == "A"));
        assert!(matches!(**right, PipelineExpr::Compose { .. }));
    }

    #[test]
    fn parses_stage_slots_and_markers() {
        let program = parse_ok(
            "stage Keep<T>: { value: T, tags: List<Str> } -> Batch<T> @identity;
             source Ticks -> _;
             stage Opaque;",
        );
        let stages = program
            .items
            .iter()
            .filter_map(|item| match item {
                Item::Stage(stage) => Some(stage),
                _ => None,
            })
            .collect::<Vec<_>>();

        let keep = stages[0];
        assert_eq!(keep.generics, vec!["T".to_string()]);
        let SchemaSlot::Inline(fields) = &keep.input else {
            panic!("expected inline input");
        };
        assert_eq!(fields.len(), 2);
        assert_eq!(fields[1].ty.args[0].name, "Str");
        assert!(matches!(&keep.output, SchemaSlot::Named(ty) if ty.name == "Batch"));
        assert_eq!(keep.marker.as_ref().map(|m| m.name.as_str()), Some("identity"));

        assert_eq!(stages[1].form, StageForm::Source);
        assert_eq!(stages[1].output, SchemaSlot::Undeclared);
        assert_eq!(stages[2].input, SchemaSlot::Undeclared);
        assert_eq!(stages[2].output, SchemaSlot::Undeclared);
    }

    #[test]
    fn parses_types_aliases_and_imports() {
        let program = parse_ok(
            "import \"shared\";
             type Celsius: Temperature, Reading;
             schema Pair<A, B> = Tuple<A, B>;",
        );
        assert!(matches!(&program.items[0], Item::Import(import) if import.path == "shared"));
        let Item::Type(ty) = &program.items[1] else {
            panic!("expected type");
        };
        assert_eq!(ty.parents, vec!["Temperature".to_string(), "Reading".to_string()]);
        let Item::Schema(schema) = &program.items[2] else {
            panic!("expected schema");
        };
        assert_eq!(schema.generics.len(), 2);
        assert!(matches!(&schema.body, SchemaBody::Alias(target) if target.args.len() == 2));
    }

    #[test]
    fn reports_missing_semicolon() {
        let error = parse_err("pipeline p = A * B");
        assert_eq!(error.kind, crate::error::DiagnosticKind::Syntax);
        assert!(error.message.starts_with("expected ';'"), "{}", error.message);
    }
}
