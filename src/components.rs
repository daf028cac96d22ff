//! Built-in UI element registry.
//!
//! Any element call whose callee is not declared in the module being lowered is
//! looked up here. Unknown callees are still treated as built-in elements; the
//! registry only matters for nesting checks inside pass-through code.

use std::collections::HashSet;

lazy_static::lazy_static! {
    pub static ref CONTAINER_COMPONENTS: HashSet<&'static str> = {
        let mut s = HashSet::new();
        s.insert("Column");
        s.insert("Row");
        s.insert("Stack");
        s.insert("Flex");
        s.insert("Grid");
        s.insert("GridItem");
        s.insert("GridRow");
        s.insert("GridCol");
        s.insert("List");
        s.insert("ListItem");
        s.insert("Scroll");
        s.insert("Swiper");
        s.insert("Tabs");
        s.insert("TabContent");
        s.insert("Navigator");
        s.insert("RelativeContainer");
        s.insert("Button");
        s
    };

    pub static ref ATOMIC_COMPONENTS: HashSet<&'static str> = {
        let mut s = HashSet::new();
        s.insert("Text");
        s.insert("Image");
        s.insert("TextInput");
        s.insert("TextArea");
        s.insert("Toggle");
        s.insert("Checkbox");
        s.insert("Radio");
        s.insert("Slider");
        s.insert("Progress");
        s.insert("Divider");
        s.insert("Blank");
        s.insert("Span");
        s.insert("Select");
        s.insert("DatePicker");
        s.insert("TimePicker");
        s.insert("LoadingProgress");
        s
    };

    pub static ref CONTROL_FLOW_COMPONENTS: HashSet<&'static str> = {
        let mut s = HashSet::new();
        s.insert("If");
        s.insert("ForEach");
        s.insert("LazyForEach");
        s
    };
}

pub const IF_CONTAINER: &str = "If";
pub const FOR_EACH_CONTAINER: &str = "ForEach";

pub fn is_builtin(name: &str) -> bool {
    CONTAINER_COMPONENTS.contains(name)
        || ATOMIC_COMPONENTS.contains(name)
        || CONTROL_FLOW_COMPONENTS.contains(name)
}

pub fn is_container(name: &str) -> bool {
    CONTAINER_COMPONENTS.contains(name) || CONTROL_FLOW_COMPONENTS.contains(name)
}
