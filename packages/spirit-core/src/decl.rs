//! Model class declarations.
//!
//! A declaration is the static description of a model class: its name,
//! superclass, decorators and members. Declarations are what the schema
//! compiler inspects; they are either deserialized from JSON model sources
//! or assembled in code with the builder methods below.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One model source file: a path and the items declared in it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceFile {
    /// Location the declarations were read from (informational).
    #[serde(default)]
    pub path: String,
    /// Top-level items, in declaration order.
    #[serde(default)]
    pub items: Vec<SourceItem>,
}

impl SourceFile {
    /// Creates an empty source file for the given path.
    #[must_use]
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            items: Vec::new(),
        }
    }

    /// Appends a class declaration.
    #[must_use]
    pub fn class(mut self, class: ClassDecl) -> Self {
        self.items.push(SourceItem::Class(class));
        self
    }

    /// Appends a namespace.
    #[must_use]
    pub fn namespace(mut self, name: impl Into<String>, items: Vec<SourceItem>) -> Self {
        self.items.push(SourceItem::Namespace {
            name: name.into(),
            items,
        });
        self
    }
}

/// Top-level item of a source file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum SourceItem {
    /// A class declaration.
    Class(ClassDecl),
    /// A namespace whose children are visited like top-level items.
    Namespace {
        name: String,
        #[serde(default)]
        items: Vec<SourceItem>,
    },
}

/// Member visibility.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Visibility {
    #[default]
    Public,
    Protected,
    Private,
}

/// Kind of inline initializer attached to a property.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Initializer {
    /// A plain value expression; the property is still a schema field.
    Expression,
    /// An inline function; the property is behaviour, not data.
    ArrowFunction,
}

/// A decorator application, e.g. `@route("get", "/stats")`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecoratorCall {
    pub name: String,
    /// Positional arguments; matched against the decorator's parameter names.
    #[serde(default)]
    pub args: Vec<Value>,
}

impl DecoratorCall {
    /// A decorator applied without arguments.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            args: Vec::new(),
        }
    }

    /// A decorator applied with positional arguments.
    #[must_use]
    pub fn with_args(name: impl Into<String>, args: Vec<Value>) -> Self {
        Self {
            name: name.into(),
            args,
        }
    }
}

/// Declaration of a class.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassDecl {
    pub name: String,
    #[serde(default = "default_exported")]
    pub exported: bool,
    #[serde(default)]
    pub documentation: String,
    /// Declared superclass name.
    #[serde(default)]
    pub extends: Option<String>,
    #[serde(default)]
    pub decorators: Vec<DecoratorCall>,
    #[serde(default)]
    pub members: Vec<MemberDecl>,
}

fn default_exported() -> bool {
    true
}

impl ClassDecl {
    /// Creates an exported class without decorators or members.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            exported: true,
            documentation: String::new(),
            extends: None,
            decorators: Vec::new(),
            members: Vec::new(),
        }
    }

    /// Shorthand for a class carrying the `@model()` marker.
    #[must_use]
    pub fn model(name: impl Into<String>) -> Self {
        Self::new(name).decorate(DecoratorCall::new("model"))
    }

    #[must_use]
    pub fn decorate(mut self, decorator: DecoratorCall) -> Self {
        self.decorators.push(decorator);
        self
    }

    #[must_use]
    pub fn extends(mut self, superclass: impl Into<String>) -> Self {
        self.extends = Some(superclass.into());
        self
    }

    #[must_use]
    pub fn documented(mut self, doc: impl Into<String>) -> Self {
        self.documentation = doc.into();
        self
    }

    #[must_use]
    pub fn not_exported(mut self) -> Self {
        self.exported = false;
        self
    }

    #[must_use]
    pub fn property(mut self, property: PropertyDecl) -> Self {
        self.members.push(MemberDecl::Property(property));
        self
    }

    #[must_use]
    pub fn method(mut self, method: MethodDecl) -> Self {
        self.members.push(MemberDecl::Method(method));
        self
    }

    /// Returns `true` if a decorator with the given name is applied.
    #[must_use]
    pub fn has_decorator(&self, name: &str) -> bool {
        self.decorators.iter().any(|d| d.name == name)
    }
}

/// A class member.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum MemberDecl {
    Property(PropertyDecl),
    Method(MethodDecl),
}

/// A property member with its static type text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PropertyDecl {
    pub name: String,
    /// Static type as written, e.g. `string`, `Date`, `User[]`.
    #[serde(rename = "type")]
    pub type_name: String,
    #[serde(default)]
    pub visibility: Visibility,
    #[serde(default)]
    pub initializer: Option<Initializer>,
    #[serde(default)]
    pub decorators: Vec<DecoratorCall>,
}

impl PropertyDecl {
    #[must_use]
    pub fn new(name: impl Into<String>, type_name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            type_name: type_name.into(),
            visibility: Visibility::Public,
            initializer: None,
            decorators: Vec::new(),
        }
    }

    #[must_use]
    pub fn decorate(mut self, decorator: DecoratorCall) -> Self {
        self.decorators.push(decorator);
        self
    }

    /// Applies an argument-less decorator, e.g. `.with("required")`.
    #[must_use]
    pub fn with(self, decorator: &str) -> Self {
        self.decorate(DecoratorCall::new(decorator))
    }

    #[must_use]
    pub fn visibility(mut self, visibility: Visibility) -> Self {
        self.visibility = visibility;
        self
    }

    #[must_use]
    pub fn initialized(mut self, initializer: Initializer) -> Self {
        self.initializer = Some(initializer);
        self
    }
}

/// A method member.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MethodDecl {
    pub name: String,
    #[serde(default, rename = "static")]
    pub is_static: bool,
    #[serde(default)]
    pub visibility: Visibility,
    #[serde(default)]
    pub decorators: Vec<DecoratorCall>,
}

impl MethodDecl {
    /// An instance method.
    #[must_use]
    pub fn instance(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            is_static: false,
            visibility: Visibility::Public,
            decorators: Vec::new(),
        }
    }

    /// A static method.
    #[must_use]
    pub fn statik(name: impl Into<String>) -> Self {
        Self {
            is_static: true,
            ..Self::instance(name)
        }
    }

    #[must_use]
    pub fn decorate(mut self, decorator: DecoratorCall) -> Self {
        self.decorators.push(decorator);
        self
    }

    #[must_use]
    pub fn visibility(mut self, visibility: Visibility) -> Self {
        self.visibility = visibility;
        self
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn class_deserializes_with_defaults() {
        let src: SourceFile = serde_json::from_value(json!({
            "path": "models/user.json",
            "items": [{
                "kind": "class",
                "name": "User",
                "decorators": [{ "name": "model" }],
                "members": [
                    { "kind": "property", "name": "title", "type": "string",
                      "decorators": [{ "name": "required" }, { "name": "unique" }] },
                    { "kind": "property", "name": "tags", "type": "string[]" },
                    { "kind": "method", "name": "count", "static": true }
                ]
            }]
        }))
        .unwrap();

        let SourceItem::Class(class) = &src.items[0] else {
            panic!("expected a class item");
        };
        assert!(class.exported);
        assert!(class.extends.is_none());
        assert!(class.has_decorator("model"));
        assert_eq!(class.members.len(), 3);
        match &class.members[2] {
            MemberDecl::Method(m) => {
                assert!(m.is_static);
                assert_eq!(m.visibility, Visibility::Public);
            }
            MemberDecl::Property(_) => panic!("expected a method"),
        }
    }

    #[test]
    fn namespaces_nest_items() {
        let src: SourceFile = serde_json::from_value(json!({
            "items": [{
                "kind": "namespace",
                "name": "billing",
                "items": [{ "kind": "class", "name": "Invoice" }]
            }]
        }))
        .unwrap();
        assert!(matches!(
            &src.items[0],
            SourceItem::Namespace { name, items } if name == "billing" && items.len() == 1
        ));
    }

    #[test]
    fn builders_compose() {
        let class = ClassDecl::model("Pet")
            .extends("Animal")
            .property(PropertyDecl::new("name", "string").with("required"))
            .method(MethodDecl::statik("adopt"));
        assert_eq!(class.extends.as_deref(), Some("Animal"));
        assert_eq!(class.members.len(), 2);
    }
}
