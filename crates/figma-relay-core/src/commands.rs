use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Command names understood by the Figma plugin. Parameter and result shapes
/// are owned by the plugin; the relay only needs the names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FigmaCommand {
    GetDocumentInfo,
    GetSelection,
    GetNodeInfo,
    GetNodesInfo,
    GetNodeChildren,
    ReadMyDesign,
    DeleteNode,
    DeleteMultipleNodes,
    GetStyles,
    GetLocalComponents,
    GetInstanceOverrides,
    SetInstanceOverrides,
    ExportNodeAsImage,
    Join,
    SetCornerRadius,
    CloneNode,
    SetTextContent,
    ScanTextNodes,
    SetMultipleTextContents,
    GetAnnotations,
    SetAnnotation,
    SetMultipleAnnotations,
    ScanNodesByTypes,
    SetLayoutMode,
    SetPadding,
    SetAxisAlign,
    SetLayoutSizing,
    SetItemSpacing,
    GetReactions,
    SetDefaultConnector,
    CreateConnections,
    MoveNode,
    ResizeNode,
    SetFillColor,
    SetStrokeColor,
}

impl FigmaCommand {
    pub const ALL: [FigmaCommand; 35] = [
        FigmaCommand::GetDocumentInfo,
        FigmaCommand::GetSelection,
        FigmaCommand::GetNodeInfo,
        FigmaCommand::GetNodesInfo,
        FigmaCommand::GetNodeChildren,
        FigmaCommand::ReadMyDesign,
        FigmaCommand::DeleteNode,
        FigmaCommand::DeleteMultipleNodes,
        FigmaCommand::GetStyles,
        FigmaCommand::GetLocalComponents,
        FigmaCommand::GetInstanceOverrides,
        FigmaCommand::SetInstanceOverrides,
        FigmaCommand::ExportNodeAsImage,
        FigmaCommand::Join,
        FigmaCommand::SetCornerRadius,
        FigmaCommand::CloneNode,
        FigmaCommand::SetTextContent,
        FigmaCommand::ScanTextNodes,
        FigmaCommand::SetMultipleTextContents,
        FigmaCommand::GetAnnotations,
        FigmaCommand::SetAnnotation,
        FigmaCommand::SetMultipleAnnotations,
        FigmaCommand::ScanNodesByTypes,
        FigmaCommand::SetLayoutMode,
        FigmaCommand::SetPadding,
        FigmaCommand::SetAxisAlign,
        FigmaCommand::SetLayoutSizing,
        FigmaCommand::SetItemSpacing,
        FigmaCommand::GetReactions,
        FigmaCommand::SetDefaultConnector,
        FigmaCommand::CreateConnections,
        FigmaCommand::MoveNode,
        FigmaCommand::ResizeNode,
        FigmaCommand::SetFillColor,
        FigmaCommand::SetStrokeColor,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            FigmaCommand::GetDocumentInfo => "get_document_info",
            FigmaCommand::GetSelection => "get_selection",
            FigmaCommand::GetNodeInfo => "get_node_info",
            FigmaCommand::GetNodesInfo => "get_nodes_info",
            FigmaCommand::GetNodeChildren => "get_node_children",
            FigmaCommand::ReadMyDesign => "read_my_design",
            FigmaCommand::DeleteNode => "delete_node",
            FigmaCommand::DeleteMultipleNodes => "delete_multiple_nodes",
            FigmaCommand::GetStyles => "get_styles",
            FigmaCommand::GetLocalComponents => "get_local_components",
            FigmaCommand::GetInstanceOverrides => "get_instance_overrides",
            FigmaCommand::SetInstanceOverrides => "set_instance_overrides",
            FigmaCommand::ExportNodeAsImage => "export_node_as_image",
            FigmaCommand::Join => "join",
            FigmaCommand::SetCornerRadius => "set_corner_radius",
            FigmaCommand::CloneNode => "clone_node",
            FigmaCommand::SetTextContent => "set_text_content",
            FigmaCommand::ScanTextNodes => "scan_text_nodes",
            FigmaCommand::SetMultipleTextContents => "set_multiple_text_contents",
            FigmaCommand::GetAnnotations => "get_annotations",
            FigmaCommand::SetAnnotation => "set_annotation",
            FigmaCommand::SetMultipleAnnotations => "set_multiple_annotations",
            FigmaCommand::ScanNodesByTypes => "scan_nodes_by_types",
            FigmaCommand::SetLayoutMode => "set_layout_mode",
            FigmaCommand::SetPadding => "set_padding",
            FigmaCommand::SetAxisAlign => "set_axis_align",
            FigmaCommand::SetLayoutSizing => "set_layout_sizing",
            FigmaCommand::SetItemSpacing => "set_item_spacing",
            FigmaCommand::GetReactions => "get_reactions",
            FigmaCommand::SetDefaultConnector => "set_default_connector",
            FigmaCommand::CreateConnections => "create_connections",
            FigmaCommand::MoveNode => "move_node",
            FigmaCommand::ResizeNode => "resize_node",
            FigmaCommand::SetFillColor => "set_fill_color",
            FigmaCommand::SetStrokeColor => "set_stroke_color",
        }
    }

    /// Commands the plugin processes in chunks and reports progress for.
    pub fn is_long_running(&self) -> bool {
        matches!(
            self,
            FigmaCommand::ReadMyDesign
                | FigmaCommand::DeleteMultipleNodes
                | FigmaCommand::SetInstanceOverrides
                | FigmaCommand::ExportNodeAsImage
                | FigmaCommand::ScanTextNodes
                | FigmaCommand::SetMultipleTextContents
                | FigmaCommand::SetMultipleAnnotations
                | FigmaCommand::ScanNodesByTypes
        )
    }
}

impl fmt::Display for FigmaCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FigmaCommand {
    type Err = String;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let normalized = input.trim().to_lowercase().replace('-', "_");
        FigmaCommand::ALL
            .iter()
            .copied()
            .find(|command| command.as_str() == normalized)
            .ok_or_else(|| format!("Unknown command: {}", input.trim()))
    }
}
