use extractor_contracts::ObjectDescriptor;

/// Renders the edit instruction for one descriptor.
///
/// The wording is consumed by the image-edit model; any change here changes
/// generation output and must update the golden test below.
pub fn build_prompt(descriptor: &ObjectDescriptor) -> String {
    let object = descriptor.label_canonical.trim();
    let position = descriptor.position_canonical.trim();
    format!(
        "Extract EXACTLY the {object} at {position} from this image. \
CRITICAL: Do not modify, enhance, stylize, or change ANYTHING about the {object}. \
Keep it 100% identical to the original - exact same colors, exact same textures, \
exact same lighting, exact same shadows, exact same proportions, exact same details, \
exact same angle, exact same orientation, exact same perspective, exact same viewpoint. \
Only remove the background and other objects by making them transparent. \
NO artistic interpretation, NO improvements, NO style changes, NO color adjustments, \
NO rotation, NO angle changes, NO perspective changes. \
Perfect pixel-level accuracy required. \
Maintain the EXACT same viewing angle and orientation as shown in the original image."
    )
}
