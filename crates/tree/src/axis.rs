//! XPath axes.
use crate::error::TreeError;
use crate::node::NodeKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Axis {
    Ancestor,
    AncestorOrSelf,
    Attribute,
    Child,
    Descendant,
    DescendantOrSelf,
    Following,
    FollowingSibling,
    Namespace,
    Parent,
    Preceding,
    PrecedingSibling,
    SelfAxis,
    /// Preceding nodes including ancestors; used for node numbering.
    PrecedingOrAncestor,
}

impl Axis {
    pub const ALL: [Axis; 14] = [
        Axis::Ancestor,
        Axis::AncestorOrSelf,
        Axis::Attribute,
        Axis::Child,
        Axis::Descendant,
        Axis::DescendantOrSelf,
        Axis::Following,
        Axis::FollowingSibling,
        Axis::Namespace,
        Axis::Parent,
        Axis::Preceding,
        Axis::PrecedingSibling,
        Axis::SelfAxis,
        Axis::PrecedingOrAncestor,
    ];

    /// True when the axis delivers nodes in document order.
    pub fn is_forward(self) -> bool {
        !self.is_reverse()
    }

    pub fn is_reverse(self) -> bool {
        matches!(
            self,
            Axis::Ancestor
                | Axis::AncestorOrSelf
                | Axis::Preceding
                | Axis::PrecedingSibling
                | Axis::PrecedingOrAncestor
        )
    }

    /// True when no node on the axis can be an ancestor of another.
    pub fn is_peer_axis(self) -> bool {
        matches!(
            self,
            Axis::Attribute
                | Axis::Child
                | Axis::FollowingSibling
                | Axis::Namespace
                | Axis::Parent
                | Axis::PrecedingSibling
                | Axis::SelfAxis
        )
    }

    /// The kind of node a name test selects on this axis.
    pub fn principal_node_kind(self) -> NodeKind {
        match self {
            Axis::Attribute => NodeKind::Attribute,
            Axis::Namespace => NodeKind::Namespace,
            _ => NodeKind::Element,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Axis::Ancestor => "ancestor",
            Axis::AncestorOrSelf => "ancestor-or-self",
            Axis::Attribute => "attribute",
            Axis::Child => "child",
            Axis::Descendant => "descendant",
            Axis::DescendantOrSelf => "descendant-or-self",
            Axis::Following => "following",
            Axis::FollowingSibling => "following-sibling",
            Axis::Namespace => "namespace",
            Axis::Parent => "parent",
            Axis::Preceding => "preceding",
            Axis::PrecedingSibling => "preceding-sibling",
            Axis::SelfAxis => "self",
            Axis::PrecedingOrAncestor => "preceding-or-ancestor",
        }
    }
}

impl TryFrom<u8> for Axis {
    type Error = TreeError;

    fn try_from(number: u8) -> Result<Self, Self::Error> {
        Axis::ALL
            .get(number as usize)
            .copied()
            .ok_or(TreeError::UnknownAxis(number))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_axis_numbers_round_trip() {
        for axis in Axis::ALL {
            assert_eq!(Axis::try_from(axis as u8).unwrap(), axis);
        }
    }

    #[test]
    fn test_unknown_axis_number() {
        assert!(matches!(Axis::try_from(14), Err(TreeError::UnknownAxis(14))));
    }
}
