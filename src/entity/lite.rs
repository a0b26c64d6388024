use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;
use uuid::Uuid;

use super::Entity;

// ============================================================================
// Lightweight References
// ============================================================================
//
// Aggregates reference each other by `Lite<T>` (id + display text) instead
// of embedding. `AnyLite` is the type-erased form used where the target type
// is only known at run time: package lines, operation logs, task results.
//
// ============================================================================

/// Typed reference to a stored entity.
#[derive(Serialize, Deserialize)]
#[serde(bound = "")]
pub struct Lite<T> {
    id: Uuid,
    display: String,
    #[serde(skip)]
    _entity: PhantomData<fn() -> T>,
}

impl<T> Lite<T> {
    pub fn new(id: Uuid, display: impl Into<String>) -> Self {
        Self {
            id,
            display: display.into(),
            _entity: PhantomData,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn display(&self) -> &str {
        &self.display
    }
}

impl<T: Entity> Lite<T> {
    pub fn erase(&self) -> AnyLite {
        AnyLite {
            entity_type: T::TYPE_NAME.to_string(),
            id: self.id,
            display: self.display.clone(),
        }
    }
}

impl<T> Clone for Lite<T> {
    fn clone(&self) -> Self {
        Self::new(self.id, self.display.clone())
    }
}

impl<T> PartialEq for Lite<T> {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl<T> Eq for Lite<T> {}

impl<T> Hash for Lite<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl<T> fmt::Debug for Lite<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Lite")
            .field("id", &self.id)
            .field("display", &self.display)
            .finish()
    }
}

impl<T> fmt::Display for Lite<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.display)
    }
}

/// Reference to a stored entity of any type.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Hash)]
pub struct AnyLite {
    pub entity_type: String,
    pub id: Uuid,
    pub display: String,
}

impl AnyLite {
    pub fn is<T: Entity>(&self) -> bool {
        self.entity_type == T::TYPE_NAME
    }

    /// Typed view of this reference, if it points at a `T`.
    pub fn downcast<T: Entity>(&self) -> Option<Lite<T>> {
        self.is::<T>().then(|| Lite::new(self.id, self.display.clone()))
    }
}

impl fmt::Display for AnyLite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.entity_type, self.display)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Serialize, Deserialize, Clone, Debug)]
    struct Widget {
        id: Option<Uuid>,
        name: String,
    }

    impl Entity for Widget {
        const TYPE_NAME: &'static str = "Widget";

        fn id(&self) -> Option<Uuid> {
            self.id
        }

        fn assign_id(&mut self, id: Uuid) {
            self.id = Some(id);
        }

        fn display(&self) -> String {
            self.name.clone()
        }
    }

    #[derive(Serialize, Deserialize, Clone, Debug)]
    struct Gadget {
        id: Option<Uuid>,
    }

    impl Entity for Gadget {
        const TYPE_NAME: &'static str = "Gadget";

        fn id(&self) -> Option<Uuid> {
            self.id
        }

        fn assign_id(&mut self, id: Uuid) {
            self.id = Some(id);
        }

        fn display(&self) -> String {
            "gadget".to_string()
        }
    }

    #[test]
    fn test_new_entity_has_no_lite() {
        let widget = Widget { id: None, name: "bolt".to_string() };
        assert!(widget.is_new());
        assert!(widget.to_lite().is_none());
    }

    #[test]
    fn test_lite_erase_and_downcast() {
        let id = Uuid::now_v7();
        let widget = Widget { id: Some(id), name: "bolt".to_string() };
        let lite = widget.to_lite().unwrap();

        let any = lite.erase();
        assert_eq!(any.entity_type, "Widget");
        assert_eq!(any.to_string(), "Widget bolt");

        assert_eq!(any.downcast::<Widget>(), Some(lite));
        assert!(any.downcast::<Gadget>().is_none());
    }

    #[test]
    fn test_lite_serializes_without_type_marker() {
        let lite: Lite<Widget> = Lite::new(Uuid::now_v7(), "bolt");
        let json = serde_json::to_value(&lite).unwrap();

        assert_eq!(json["display"], "bolt");
        assert!(json.get("_entity").is_none());

        let back: Lite<Widget> = serde_json::from_value(json).unwrap();
        assert_eq!(back, lite);
    }
}
